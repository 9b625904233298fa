//! Deterministic external ids: a short prefix plus random hex, following
//! `_new_task_id` in `backend/src/api/v1/oracle_tx_outbox.py` (`txo_<hex16>`).

use rand::RngCore;

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

macro_rules! id_kind {
    ($name:ident, $prefix:literal) => {
        pub fn $name() -> String {
            format!(concat!($prefix, "_{}"), random_hex(8))
        }
    };
}

id_kind!(revenue_event_id, "rev");
id_kind!(expense_event_id, "exp");
id_kind!(project_capital_event_id, "pcap");
id_kind!(marketing_fee_event_id, "mfee");
id_kind!(bounty_id, "bty");
id_kind!(proposal_id, "prp");
id_kind!(project_id, "proj");
id_kind!(tx_outbox_task_id, "txo");
id_kind!(git_outbox_task_id, "gto");
id_kind!(invoice_id, "inv");
id_kind!(distribution_id, "dist");
id_kind!(distribution_execution_id, "dex");
id_kind!(payout_id, "pay");
id_kind!(audit_id, "aud");
id_kind!(agent_id, "agt");
id_kind!(oracle_request_id, "req");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_the_expected_prefix() {
        assert!(revenue_event_id().starts_with("rev_"));
        assert!(tx_outbox_task_id().starts_with("txo_"));
        assert!(git_outbox_task_id().starts_with("gto_"));
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        assert_ne!(bounty_id(), bounty_id());
    }
}
