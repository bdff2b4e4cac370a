//! Benchmarks for attaching, updating and disposing trees.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use arbor_core::{Fields, Node, Result, Route, Rules, Tree, Value};

struct Chain {
    depth: Value<u32>,
}

impl Node for Chain {
    type Props = u32;

    fn init(depth: u32, fields: &mut Fields<'_>) -> Self {
        Chain {
            depth: fields.value(depth),
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let depth = cx.get(&self.depth)?;
        Ok(if depth > 1 {
            Route::single::<Chain>(depth - 1)
        } else {
            Route::none()
        })
    }
}

struct Counters {
    count: Value<u64>,
}

impl Node for Counters {
    type Props = usize;

    fn init(_: usize, fields: &mut Fields<'_>) -> Self {
        Counters {
            count: fields.value(0),
        }
    }

    fn rules(&self, cx: &mut Rules<'_>) -> Result<Route> {
        let count = cx.get(&self.count)?;
        Ok(Route::each::<Cell, _>((0..64_u64).map(|key| (key, count))))
    }
}

struct Cell {
    value: u64,
}

impl Node for Cell {
    type Props = u64;

    fn init(value: u64, _fields: &mut Fields<'_>) -> Self {
        Cell { value }
    }

    fn update(&mut self, value: u64) {
        self.value = value;
    }
}

/// Start and dispose chains of increasing depth
fn bench_chain_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_lifecycle");

    for depth in [100_u32, 400, 800] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                let tree = Tree::<Chain>::start(depth).unwrap();
                black_box(tree.live_scopes());
                tree.dispose();
            });
        });
    }

    group.finish();
}

/// Re-evaluate a parent whose keyed children all survive
fn bench_keyed_update(c: &mut Criterion) {
    let tree = Tree::<Counters>::start(64).unwrap();
    let count = tree.with_model(|counters| counters.count).unwrap();

    c.bench_function("keyed_update_64", |b| {
        b.iter(|| {
            tree.write(|tx| tx.update(&count, |count| *count += 1))
                .unwrap();
        });
    });

    let first = tree.read(|view| view.children(tree.root_id())).unwrap().unwrap()[0];
    black_box(tree.with_node::<Cell, _>(first, |cell| cell.value).unwrap());
}

criterion_group!(benches, bench_chain_lifecycle, bench_keyed_update);
criterion_main!(benches);
