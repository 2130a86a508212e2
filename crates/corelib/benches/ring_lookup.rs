use corelib::{Node, NodeId, RingBuilder};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_lookup(c: &mut Criterion) {
    let mut builder = RingBuilder::new().with_vnodes(64);
    for id in 0..32 {
        builder = builder.add_node(Node::new(NodeId(id), format!("10.0.0.{}:7000", id)));
    }
    let ring = builder.build().expect("valid ring");
    let keys: Vec<String> = (0..1024).map(|i| format!("user:{}", i)).collect();

    c.bench_function("lookup_32_nodes_64_vnodes", |b| {
        let mut i = 0;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(ring.lookup(key.as_bytes()))
        })
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
