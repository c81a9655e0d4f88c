//! Power-of-two-choices steal victim selection and the steal-threshold gate
//!. Pure decision logic; the actual `StealRequest`/
//! `StealResponse` exchange happens over `wire::Message` on whatever
//! transport the caller wires up.

use rand::seq::SliceRandom;
use rand::Rng;

/// A worker initiates a steal only when its own queue is empty and at
/// least one peer's queue is more than twice its size.
pub fn should_initiate_steal(local_queue_size: u32, peer_queue_sizes: &[u32]) -> bool {
    if local_queue_size != 0 {
        return false;
    }
    peer_queue_sizes.iter().any(|&size| u64::from(size) > 2 * u64::from(local_queue_size))
}

/// Picks two random peers (by id) and returns whichever reports the larger
/// queue size, or `None` if there are no peers to pick from.
pub fn pick_victim<'a>(peers: &'a [(String, u32)], rng: &mut impl Rng) -> Option<&'a str> {
    if peers.is_empty() {
        return None;
    }
    if peers.len() == 1 {
        return Some(peers[0].0.as_str());
    }

    let sample: Vec<&(String, u32)> = peers.choose_multiple(rng, 2).collect();
    let winner = if sample[0].1 >= sample[1].1 { sample[0] } else { sample[1] };
    Some(winner.0.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_steal_when_local_queue_nonempty() {
        assert!(!should_initiate_steal(1, &[100]));
    }

    #[test]
    fn steal_when_local_empty_and_peer_well_ahead() {
        assert!(should_initiate_steal(0, &[5]));
    }

    #[test]
    fn no_steal_when_everyone_is_idle() {
        assert!(!should_initiate_steal(0, &[0, 0]));
    }

    #[test]
    fn pick_victim_prefers_larger_queue() {
        let peers = vec![("a".to_string(), 1u32), ("b".to_string(), 50u32)];
        let mut rng = rand::thread_rng();
        // With only two peers, power-of-two-choices samples both, so the
        // larger queue always wins deterministically.
        assert_eq!(pick_victim(&peers, &mut rng), Some("b"));
    }

    #[test]
    fn pick_victim_none_when_no_peers() {
        let mut rng = rand::thread_rng();
        assert_eq!(pick_victim(&[], &mut rng), None);
    }
}
