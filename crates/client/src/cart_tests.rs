// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use proptest::prelude::*;

use super::*;
use crate::store::MemoryStore;

fn carts() -> (GuestCartStore, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (GuestCartStore::new(store.clone()), store)
}

#[test]
fn add_accumulates_quantity_per_product() -> anyhow::Result<()> {
    let (carts, _) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 2))?;
    carts.add_item("M1", GuestCartItem::new(2, 1))?;
    carts.add_item("M1", GuestCartItem { name: Some("Basmati 5kg".to_owned()), ..GuestCartItem::new(1, 3) })?;

    let cart = carts.get("M1").ok_or_else(|| anyhow::anyhow!("no cart"))?;
    assert_eq!(cart.items.len(), 2);
    assert_eq!(cart.item(1).map(|i| i.quantity), Some(5));
    assert_eq!(cart.item(1).and_then(|i| i.name.as_deref()), Some("Basmati 5kg"));
    assert_eq!(cart.total_quantity(), 6);
    assert!(cart.updated_at > 0);
    Ok(())
}

#[test]
fn malls_are_independent() -> anyhow::Result<()> {
    let (carts, _) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 1))?;
    carts.add_item("M2", GuestCartItem::new(1, 4))?;
    carts.clear("M1")?;

    assert_eq!(carts.get("M1"), None);
    assert_eq!(carts.get("M2").map(|c| c.total_quantity()), Some(4));
    Ok(())
}

#[yare::parameterized(
    zero_removes = { 0, None },
    negative_removes = { -3, None },
    positive_sets = { 7, Some(7) },
)]
fn update_quantity(quantity: i64, expected: Option<u32>) {
    let (carts, _) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 2)).expect("add");
    carts.add_item("M1", GuestCartItem::new(2, 1)).expect("add");
    carts.update_quantity("M1", 1, quantity).expect("update");

    let cart = carts.get("M1").expect("cart");
    assert_eq!(cart.item(1).map(|i| i.quantity), expected);
    assert_eq!(cart.item(2).map(|i| i.quantity), Some(1));
}

#[test]
fn update_unknown_product_is_a_no_op() -> anyhow::Result<()> {
    let (carts, _) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 2))?;
    carts.update_quantity("M1", 99, 4)?;
    assert_eq!(carts.get("M1").map(|c| c.items.len()), Some(1));
    Ok(())
}

#[test]
fn removing_last_item_deletes_mall_entry() -> anyhow::Result<()> {
    let (carts, store) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 2))?;
    carts.remove_item("M1", 1)?;

    assert_eq!(carts.get("M1"), None);
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn corrupt_data_reads_as_empty() -> anyhow::Result<()> {
    let (carts, store) = carts();
    store.set(GUEST_CART_KEY, "{not json")?;
    assert!(carts.get_all().is_empty());

    carts.add_item("M1", GuestCartItem::new(5, 1))?;
    assert_eq!(carts.get_all().len(), 1);
    Ok(())
}

#[test]
fn clear_all_drops_every_mall() -> anyhow::Result<()> {
    let (carts, _) = carts();
    carts.add_item("M1", GuestCartItem::new(1, 1))?;
    carts.add_item("M2", GuestCartItem::new(2, 1))?;
    carts.clear_all()?;
    assert!(carts.get_all().is_empty());
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Add(u8, u64, u32),
    Update(u8, u64, i64),
    Remove(u8, u64),
    Clear(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3u8, 0..5u64, 0..4u32).prop_map(|(m, p, q)| Op::Add(m, p, q)),
        (0..3u8, 0..5u64, -2..4i64).prop_map(|(m, p, q)| Op::Update(m, p, q)),
        (0..3u8, 0..5u64).prop_map(|(m, p)| Op::Remove(m, p)),
        (0..3u8).prop_map(Op::Clear),
    ]
}

proptest! {
    #[test]
    fn payloads_stay_well_formed(ops in proptest::collection::vec(op(), 0..40)) {
        let (carts, _) = carts();
        for op in ops {
            let result = match op {
                Op::Add(m, p, q) => carts.add_item(&format!("M{m}"), GuestCartItem::new(p, q)),
                Op::Update(m, p, q) => carts.update_quantity(&format!("M{m}"), p, q),
                Op::Remove(m, p) => carts.remove_item(&format!("M{m}"), p),
                Op::Clear(m) => carts.clear(&format!("M{m}")),
            };
            prop_assert!(result.is_ok());
        }
        for (mall_id, payload) in carts.get_all() {
            prop_assert_eq!(&payload.mall_id, &mall_id);
            prop_assert!(!payload.items.is_empty());
            let unique: HashSet<u64> = payload.items.iter().map(|i| i.product_id).collect();
            prop_assert_eq!(unique.len(), payload.items.len());
            prop_assert!(payload.items.iter().all(|i| i.quantity > 0));
        }
    }
}
