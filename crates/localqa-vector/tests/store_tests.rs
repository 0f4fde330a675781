use std::collections::BTreeSet;
use std::fs;

use localqa_core::traits::FragmentStore;
use localqa_embed::HashEmbedder;
use localqa_vector::{read_jsonl, LanceFragmentStore};

const DIM: usize = 32;

fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("fragments.jsonl");
    let lines = [
        r#"{"category":"Winning Conditions","content":"Reach level 10 first to win.","domain_tags":["Rules","Endgame"],"source_file":"rules.txt","chunk_index":0}"#,
        r#"{"category":"Setup","content":"Place the board in the middle of the table.","source_file":"rules.txt","chunk_index":1}"#,
        "",
        r#"{"id":"faq-1","collection":"faq","category":"Card Sleeves","content":"Sleeves are optional."}"#,
    ];
    fs::write(&path, lines.join("\n")).expect("write fixture");
    path
}

#[test]
fn jsonl_import_fills_missing_vectors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = write_fixture(tmp.path());
    let fragments = read_jsonl(&path, "rules", &HashEmbedder::new(DIM))?;
    assert_eq!(fragments.len(), 3, "blank lines are skipped");
    assert_eq!(fragments[0].id, "rules.txt:0");
    assert_eq!(fragments[0].collection, "rules");
    assert_eq!(fragments[2].collection, "faq");
    assert!(fragments.iter().all(|f| f.dim() == Some(DIM)));
    assert!(fragments[0].domain_tags.contains("rules"), "tags are lower-cased");
    Ok(())
}

#[tokio::test]
async fn lance_store_round_trip_by_collection() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = write_fixture(tmp.path());
    let fragments = read_jsonl(&path, "rules", &HashEmbedder::new(DIM))?;

    let db_dir = tmp.path().join("lancedb");
    let store = LanceFragmentStore::open(&db_dir.to_string_lossy(), "fragments", DIM).await?;
    assert_eq!(store.count().await?, 0, "missing table counts as empty");
    assert!(store.load_fragments("rules", &BTreeSet::new()).await?.is_empty());

    assert_eq!(store.add_fragments(&fragments).await?, 3);
    assert_eq!(store.count().await?, 3);

    let rules = store.load_fragments("rules", &BTreeSet::new()).await?;
    assert_eq!(rules.len(), 2);
    let win = rules.iter().find(|f| f.category == "Winning Conditions").expect("winning fragment");
    assert_eq!(win.category_vector, fragments[0].category_vector);
    assert_eq!(win.domain_tags, fragments[0].domain_tags);
    assert_eq!(win.chunk_index, 0);

    let faq = store.load_fragments("faq", &BTreeSet::new()).await?;
    assert_eq!(faq.len(), 1);
    assert_eq!(faq[0].id, "faq-1");
    Ok(())
}

#[tokio::test]
async fn lance_store_rejects_wrong_dimension() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = write_fixture(tmp.path());
    let fragments = read_jsonl(&path, "rules", &HashEmbedder::new(DIM / 2))?;
    let store = LanceFragmentStore::open(&tmp.path().join("db").to_string_lossy(), "fragments", DIM).await?;
    assert!(store.add_fragments(&fragments).await.is_err());
    Ok(())
}
