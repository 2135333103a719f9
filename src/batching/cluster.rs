//! Partitions an order pool into candidate groups for the scoring loop.
//! No batching ever crosses a cluster boundary.

use std::collections::HashMap;

use crate::batching::policy::BatchPolicy;
use crate::order::model::Order;

/// Groups the pool either globally (continuous chaining) or by pickup id.
/// Groups are disjoint, their union is the input, and insertion order is
/// preserved within each group.
pub fn cluster_orders(pool: &[Order], policy: &BatchPolicy) -> Vec<Vec<Order>> {
    if pool.is_empty() {
        return Vec::new();
    }

    if policy.enable_continuous_chaining {
        return vec![pool.to_vec()];
    }

    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<Order>> = Vec::new();

    for order in pool {
        match index.get(order.pickup_id.as_str()) {
            Some(&slot) => groups[slot].push(order.clone()),
            None => {
                index.insert(order.pickup_id.as_str(), groups.len());
                groups.push(vec![order.clone()]);
            }
        }
    }

    groups
}
