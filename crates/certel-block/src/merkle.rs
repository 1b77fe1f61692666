use certel_core::{Attestation, CertelError};
use certel_crypto::merkle_pair;

/// Merkle root over transaction ids: the empty string for an empty body, the
/// sole id for a single transaction, otherwise the standard binary SHA-256
/// tree with last-node duplication on odd levels.
pub fn merkle_root(transactions: &[Attestation]) -> Result<String, CertelError> {
    match transactions.len() {
        0 => return Ok(String::new()),
        1 => return Ok(transactions[0].id.clone()),
        _ => {}
    }

    let mut level: Vec<String> = transactions.iter().map(|tx| tx.id.clone()).collect();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(merkle_pair(&pair[0], &pair[1])?);
        }
        level = next;
    }
    Ok(level.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tx(inquiry: &str) -> Attestation {
        Attestation::build("PK", "Name", "Surname", inquiry, Utc::now(), "sig")
    }

    #[test]
    fn empty_body_yields_empty_root() {
        assert_eq!(merkle_root(&[]).unwrap(), "");
    }

    #[test]
    fn single_transaction_root_is_its_id() {
        let t = tx("inq-1");
        assert_eq!(merkle_root(std::slice::from_ref(&t)).unwrap(), t.id);
    }

    #[test]
    fn two_transactions_hash_as_one_pair() {
        let a = tx("inq-1");
        let b = tx("inq-2");
        let expected = merkle_pair(&a.id, &b.id).unwrap();
        assert_eq!(merkle_root(&[a, b]).unwrap(), expected);
    }

    #[test]
    fn odd_level_duplicates_last_node() {
        let a = tx("inq-1");
        let b = tx("inq-2");
        let c = tx("inq-3");

        let ab = merkle_pair(&a.id, &b.id).unwrap();
        let cc = merkle_pair(&c.id, &c.id).unwrap();
        let expected = merkle_pair(&ab, &cc).unwrap();

        assert_eq!(merkle_root(&[a, b, c]).unwrap(), expected);
    }

    #[test]
    fn root_depends_on_order() {
        let a = tx("inq-1");
        let b = tx("inq-2");
        let fwd = merkle_root(&[a.clone(), b.clone()]).unwrap();
        let rev = merkle_root(&[b, a]).unwrap();
        assert_ne!(fwd, rev);
    }
}
