use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mrt::route::{route_table, shortest_route, widest_route, Criterion as RouteCriterion};
use mrt::spanning::{efficient_topology, CapacityGraph};
use mrt::Topology;

/// 체인으로 연결을 보장한 임의 메시
fn random_mesh(nodes: usize, extra_edges: usize, rng: &mut StdRng) -> Topology {
    let mut topology = Topology::new();
    for i in 0..nodes {
        topology.add_node(format!("n{:04}", i), "127.0.0.1").unwrap();
    }

    let link = |topology: &mut Topology, a: usize, b: usize, rng: &mut StdRng| {
        let latency = rng.gen_range(1.0..200.0);
        let bandwidth = rng.gen_range(1.0..1000.0);
        topology
            .set_edge(&format!("n{:04}", a), &format!("n{:04}", b), Some(latency), Some(bandwidth))
            .unwrap();
    };

    for i in 1..nodes {
        let j = rng.gen_range(0..i);
        link(&mut topology, i, j, rng);
        link(&mut topology, j, i, rng);
    }
    for _ in 0..extra_edges {
        let (a, b) = (rng.gen_range(0..nodes), rng.gen_range(0..nodes));
        if a != b {
            link(&mut topology, a, b, rng);
        }
    }
    topology
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let rng = &mut StdRng::seed_from_u64(42);

    for nodes in [10, 100, 1_000] {
        let topology = random_mesh(nodes, nodes * 4, rng);
        let destination = format!("n{:04}", nodes - 1);

        let mut g = c.benchmark_group("route");
        g.bench_function(BenchmarkId::new("latency", nodes), |b| {
            b.iter(|| shortest_route(&topology, "n0000", &destination, RouteCriterion::Latency))
        });
        g.bench_function(BenchmarkId::new("bandwidth", nodes), |b| {
            b.iter(|| shortest_route(&topology, "n0000", &destination, RouteCriterion::Bandwidth))
        });
        g.bench_function(BenchmarkId::new("widest", nodes), |b| {
            b.iter(|| widest_route(&topology, "n0000", &destination))
        });
        g.finish();

        let graph = CapacityGraph::from_topology(&topology);
        c.bench_function(&format!("kruskal/{}", nodes), |b| {
            b.iter(|| efficient_topology(&graph))
        });
    }

    let topology = random_mesh(50, 200, rng);
    c.bench_function("route_table/50", |b| {
        b.iter(|| route_table(&topology, RouteCriterion::Latency))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
