use echo_core::models::EchoEntry;
use echo_storage::migrations::run_migrations;
use echo_storage::queries::entries::{rebuild, stats};
use proptest::prelude::*;
use rusqlite::Connection;

fn arb_entries() -> impl Strategy<Value = Vec<EchoEntry>> {
    proptest::collection::vec("[a-z]{3,12}", 1..12).prop_map(|words| {
        words
            .into_iter()
            .enumerate()
            .map(|(i, word)| EchoEntry {
                id: format!("e{i}"),
                role: "reviewer".to_string(),
                layer: "notes".to_string(),
                date: "2026-01-01".to_string(),
                source: String::new(),
                tags: String::new(),
                content: format!("{word} content for entry {i}"),
                line_number: 1,
                file_path: "/echoes/reviewer/MEMORY.md".to_string(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn rebuilding_with_the_same_entries_is_idempotent(entries in arb_entries()) {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        rebuild(&mut conn, &entries).unwrap();
        let first = stats(&conn).unwrap();

        rebuild(&mut conn, &entries).unwrap();
        let second = stats(&conn).unwrap();

        prop_assert_eq!(first.total, second.total);
        prop_assert_eq!(first.total, entries.len() as i64);
        prop_assert_eq!(first.by_layer, second.by_layer);
        prop_assert_eq!(first.by_role, second.by_role);
    }
}
