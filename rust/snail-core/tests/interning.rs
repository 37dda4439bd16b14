//! Interner properties: identity equals string equality, resolve inverts
//! intern, and shared handles stay consistent across threads.

use snail_core::{IntStr, SharedStringTable, StringTable};
use std::collections::HashSet;
use std::thread;

fn sample_words() -> Vec<String> {
    let mut words: Vec<String> = (0..200).map(|i| format!("sym-{}", i % 150)).collect();
    words.extend(["lambda", "λ", "", "set!", "..."].iter().map(|s| s.to_string()));
    words
}

// ─── Identity ───

#[test]
fn equal_ids_iff_equal_strings() {
    let mut table = StringTable::new();
    let words = sample_words();
    let ids: Vec<IntStr> = words.iter().map(|w| table.intern(w)).collect();
    for (i, a) in words.iter().enumerate() {
        for (j, b) in words.iter().enumerate() {
            assert_eq!(ids[i] == ids[j], a == b, "{a:?} vs {b:?}");
        }
    }
}

#[test]
fn resolve_inverts_intern() {
    let mut table = StringTable::new();
    for w in sample_words() {
        let id = table.intern(&w);
        assert_eq!(table.resolve(id), w);
    }
}

#[test]
fn ids_cover_exactly_distinct_strings() {
    let mut table = StringTable::new();
    let words = sample_words();
    for w in &words {
        table.intern(w);
    }
    let distinct: HashSet<&String> = words.iter().collect();
    assert_eq!(table.len(), distinct.len());
    let max = table.iter().map(|(id, _)| id.raw()).max();
    assert_eq!(max, Some(distinct.len() as u32 - 1));
}

// ─── Sharing ───

#[test]
fn concurrent_interning_agrees() {
    let shared = SharedStringTable::new();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let table = shared.clone();
            thread::spawn(move || {
                (0..500)
                    .map(|i| {
                        let name = format!("v{}", (i * 7 + t) % 64);
                        (name.clone(), table.intern(&name))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = std::collections::HashMap::new();
    for h in handles {
        for (name, id) in h.join().expect("worker panicked") {
            let prev = seen.insert(name.clone(), id);
            if let Some(prev) = prev {
                assert_eq!(prev, id, "{name} interned twice");
            }
        }
    }
    assert_eq!(shared.len(), 64);
    for (name, id) in seen {
        assert_eq!(&*shared.resolve(id), name);
    }
}
