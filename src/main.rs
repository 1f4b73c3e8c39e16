use stress_test::{stress_test_relay, stress_test_scaling, StressConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            BINDING STRESS TESTS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: two replicas, one mutation per flush
    let stats = stress_test_relay(&StressConfig::builder().num_replicas(2).build());
    stats.print();

    // Test 2: more replicas
    let stats = stress_test_relay(&StressConfig::builder().num_replicas(5).ops_per_replica(300).build());
    stats.print();

    // Test 3: several mutations per flush exercise the rewrite fallback
    let stats = stress_test_relay(
        &StressConfig::builder()
            .num_replicas(3)
            .batch_size(4)
            .seed(7)
            .build(),
    );
    stats.print();

    // Test 4: scaling analysis
    stress_test_scaling(8, 2);

    println!("\n✓ All stress tests completed");
}
