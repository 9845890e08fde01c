use codesync_common::crdt::{Author, ReplicatedText};
use proptest::prelude::*;

const OPS_PER_RUN: usize = 2_000;

#[derive(Debug, Clone)]
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        self.state
    }

    fn next_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        ((self.next_u64() >> 16) as usize) % upper_exclusive
    }
}

fn author(idx: usize) -> Author {
    Author::human(format!("participant-{idx}"))
}

fn sync_docs(docs: &mut [ReplicatedText], from: usize, to: usize) {
    let missing = docs[from].ops_since(docs[to].version_vector());
    docs[to].apply_remote(missing).expect("ops from a peer should apply");
}

fn random_edge_sync(docs: &mut [ReplicatedText], rng: &mut Lcg) {
    let from = rng.next_usize(docs.len());
    let mut to = rng.next_usize(docs.len());
    if to == from {
        to = (to + 1) % docs.len();
    }
    sync_docs(docs, from, to);
}

/// Deliver a random subset of one peer's missing ops in reverse order so the
/// receiver has to buffer them.
fn scrambled_delivery(docs: &mut [ReplicatedText], rng: &mut Lcg) {
    let from = rng.next_usize(docs.len());
    let to = (from + 1) % docs.len();
    let mut missing = docs[from].ops_since(docs[to].version_vector());
    missing.reverse();
    let keep = rng.next_usize(missing.len() + 1);
    missing.truncate(keep);
    docs[to].apply_remote(missing).expect("scrambled ops should apply");
}

fn settle_all(docs: &mut [ReplicatedText]) {
    for _ in 0..3 {
        for from in 0..docs.len() {
            for to in 0..docs.len() {
                if from != to {
                    sync_docs(docs, from, to);
                }
            }
        }
    }
}

fn random_insert_text(rng: &mut Lcg, min_len: usize, max_len: usize) -> String {
    let span = max_len.saturating_sub(min_len).saturating_add(1);
    let len = min_len + rng.next_usize(span);
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let ch = match rng.next_usize(42) {
            0..=25 => char::from(b'a' + rng.next_usize(26) as u8),
            26..=35 => char::from(b'0' + rng.next_usize(10) as u8),
            36 => ' ',
            37 => '\n',
            38 => '(',
            39 => 'é',
            40 => '🙂',
            _ => '_',
        };
        out.push(ch);
    }
    out
}

fn apply_random_edit(docs: &mut [ReplicatedText], idx: usize, rng: &mut Lcg, max_insert_len: usize) {
    let doc = &mut docs[idx];
    let who = author(idx);
    let len = doc.len();

    if len == 0 || rng.next_usize(3) == 0 {
        let index = rng.next_usize(len + 1);
        let text = random_insert_text(rng, 1, max_insert_len.max(1));
        doc.insert(&who, index, &text).expect("in-range insert should apply");
        return;
    }

    let start = rng.next_usize(len);
    let span = 1 + rng.next_usize(len - start);
    if rng.next_usize(2) == 0 {
        doc.delete(&who, start, span).expect("in-range delete should apply");
    } else {
        let text = random_insert_text(rng, 1, max_insert_len.max(1));
        doc.transact(&who, |tx| tx.replace(start, span, &text)).expect("replace should apply");
    }
}

fn apply_concurrent_same_position_insert(docs: &mut [ReplicatedText], rng: &mut Lcg) {
    let a = rng.next_usize(docs.len());
    let mut b = rng.next_usize(docs.len());
    if b == a {
        b = (b + 1) % docs.len();
    }

    // Bring both replicas to the same frontier, then edit concurrently.
    sync_docs(docs, a, b);
    sync_docs(docs, b, a);

    let index = rng.next_usize(docs[a].len() + 1);
    let insert_a = random_insert_text(rng, 1, 10);
    let insert_b = random_insert_text(rng, 1, 10);
    docs[a].insert(&author(a), index, &insert_a).expect("insert on a");
    docs[b].insert(&author(b), index, &insert_b).expect("insert on b");
}

fn run_randomized_convergence(seed: u64, clients: usize, ops: usize) {
    assert!(clients >= 2, "at least two replicas are required");

    let mut docs =
        (0..clients).map(|idx| ReplicatedText::new((idx + 1) as u64)).collect::<Vec<_>>();
    let mut rng = Lcg::new(seed);

    apply_concurrent_same_position_insert(&mut docs, &mut rng);

    for _ in 0..ops {
        match rng.next_usize(6) {
            0..=2 => {
                let actor = rng.next_usize(clients);
                apply_random_edit(&mut docs, actor, &mut rng, 16);
            }
            3 => apply_concurrent_same_position_insert(&mut docs, &mut rng),
            4 => scrambled_delivery(&mut docs, &mut rng),
            _ => {
                let actor = rng.next_usize(clients);
                apply_random_edit(&mut docs, actor, &mut rng, 12);
                random_edge_sync(&mut docs, &mut rng);
            }
        }

        if rng.next_usize(4) == 0 {
            random_edge_sync(&mut docs, &mut rng);
        }
    }

    settle_all(&mut docs);

    let expected = docs[0].snapshot();
    for (idx, doc) in docs.iter().enumerate().skip(1) {
        assert_eq!(
            doc.snapshot(),
            expected,
            "convergence mismatch for seed={seed}, clients={clients}, ops={ops}, client={idx}"
        );
        assert_eq!(doc.pending_len(), 0, "client {idx} still has buffered ops");
    }
}

#[test]
fn concurrent_seeds_of_the_same_snapshot_converge_to_one_copy() {
    let mut docs = vec![ReplicatedText::new(1), ReplicatedText::new(2), ReplicatedText::new(3)];
    for (idx, doc) in docs.iter_mut().enumerate().take(2) {
        doc.seed(&author(idx), "codesync-9", "abc").expect("empty replica should seed");
    }
    docs[2].insert(&author(2), 0, "x").expect("third replica types");

    settle_all(&mut docs);
    let text = docs[0].snapshot();
    assert_eq!(text.matches("abc").count(), 1, "seed duplicated in {text:?}");
    assert!(docs.iter().all(|doc| doc.snapshot() == text));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 8,
        max_shrink_iters: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn replicas_converge_under_random_interleavings(seed in any::<u64>(), clients in 2usize..6) {
        run_randomized_convergence(seed, clients, OPS_PER_RUN);
    }
}
