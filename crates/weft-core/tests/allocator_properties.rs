//! Property tests for address allocation and role assignment.

use std::{collections::HashSet, net::Ipv4Addr};

use ipnet::Ipv4Net;
use proptest::prelude::*;
use weft_core::{
    error::CoreError,
    ice::{negotiated_role, IceRole},
    ip_pool,
    peer::PeerId,
};

fn arb_net() -> impl Strategy<Value = Ipv4Net> {
    // Small-ish pools keep exhaustion reachable.
    (any::<u8>(), 24u8..=30).prop_map(|(third_octet, prefix)| {
        Ipv4Net::new(Ipv4Addr::new(10, 50, third_octet, 0), prefix)
            .expect("constructed prefix is valid")
            .trunc()
    })
}

proptest! {
    #[test]
    fn allocation_is_a_free_host_address(net in arb_net(), taken_count in 0usize..16) {
        let taken: HashSet<Ipv4Addr> = net.hosts().take(taken_count).collect();

        match ip_pool::allocate(net, &taken) {
            Ok(ip) => {
                prop_assert!(net.contains(&ip));
                prop_assert!(!taken.contains(&ip));
                prop_assert_ne!(ip, net.network());
                prop_assert_ne!(ip, net.broadcast());
            },
            Err(CoreError::Exhausted(_)) => {
                // Only legitimate when the taken set covers every host.
                prop_assert_eq!(taken.len(), net.hosts().count());
            },
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }

    #[test]
    fn allocation_past_the_watermark_never_reissues(
        net in arb_net(),
        assigned_count in 1usize..16,
    ) {
        // Simulate a history: addresses up to the watermark were assigned,
        // some of them since deleted (absent from taken).
        let history: Vec<Ipv4Addr> = net.hosts().take(assigned_count).collect();
        let watermark = *history.last().expect("at least one assignment");

        // Every other historic address was deleted.
        let taken: HashSet<Ipv4Addr> = history.iter().copied().step_by(2).collect();

        match ip_pool::allocate_after(net, Some(watermark), &taken) {
            Ok(ip) => prop_assert!(ip > watermark, "{ip} reissued at or below {watermark}"),
            Err(CoreError::Exhausted(_)) => {
                prop_assert_eq!(watermark, net.hosts().last().expect("nonempty pool"));
            },
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }

    #[test]
    fn sequential_allocation_is_distinct_and_monotone(net in arb_net(), count in 1usize..32) {
        let mut taken = HashSet::new();
        let mut watermark = None;
        let mut assigned = Vec::new();

        for _ in 0..count {
            match ip_pool::allocate_after(net, watermark, &taken) {
                Ok(ip) => {
                    prop_assert!(taken.insert(ip), "duplicate assignment {ip}");
                    if let Some(mark) = watermark {
                        prop_assert!(ip > mark, "watermark went backwards");
                    }
                    watermark = Some(ip);
                    assigned.push(ip);
                },
                Err(CoreError::Exhausted(_)) => break,
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }

        let mut sorted = assigned.clone();
        sorted.sort_unstable();
        prop_assert_eq!(assigned, sorted, "assignment order is ascending");
    }

    #[test]
    fn role_assignment_is_antisymmetric(a in 0u8..26, b in 0u8..26) {
        prop_assume!(a != b);

        let key = |n: u8| {
            PeerId::new(format!("{}=", char::from(b'A' + n).to_string().repeat(43)))
                .expect("test key")
        };

        let left = negotiated_role(&key(a), &key(b));
        let right = negotiated_role(&key(b), &key(a));

        prop_assert_ne!(left, right);
        let controller_is_greater =
            (left == IceRole::Controlling) == (key(a) > key(b));
        prop_assert!(controller_is_greater);
    }
}
