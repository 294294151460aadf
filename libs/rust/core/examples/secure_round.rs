/// Secure aggregation demo: three clients, one round.
///
/// Run with: cargo run --example secure_round

use secagg_core::{
    AdditiveHomomorphic, AggregationCoordinator, Contribution, GlobalModelStore, InMemoryModel, MaskedSumScheme,
    RoundController,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    secagg_core::init_tracing("secure_round_demo")?;
    println!("=== Secure Aggregation Demo ===\n");

    // clients and coordinator share the scheme key in this single-tenant setup
    let he = MaskedSumScheme::generate();
    let model = Arc::new(InMemoryModel::new(BTreeMap::from([
        ("layer.weight".to_string(), vec![1.0, 1.0, 1.0]),
        ("layer.bias".to_string(), vec![0.0]),
    ])));
    let coordinator = AggregationCoordinator::new(he.clone(), model.clone(), 3)?;
    let controller = RoundController::new(Arc::new(coordinator));

    let round = controller.status().round_id;
    let local_gradients = [("alice", [0.3, 0.0, -0.3]), ("bob", [0.6, 0.3, 0.0]), ("carol", [0.0, 0.3, 0.3])];
    for (client, grad) in local_gradients {
        let gradients = BTreeMap::from([
            ("layer.weight".to_string(), he.encode(&grad)?),
            ("layer.bias".to_string(), he.encode(&[0.1])?),
        ]);
        let accepted = controller.submit(client, Contribution::new(round, gradients))?;
        println!("{client}: accepted (contributors={}, ready={})", accepted.contributors, accepted.ready);
    }

    let summary = controller.run_round()?;
    println!("\nround {} closed with {} contributors", summary.round_id, summary.contributors);
    println!("layer.weight = {:?}", model.get("layer.weight").unwrap_or_default());
    println!("layer.bias   = {:?}", model.get("layer.bias").unwrap_or_default());
    println!("next round   = {}", controller.status().round_id);
    Ok(())
}
