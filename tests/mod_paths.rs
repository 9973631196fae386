use pagelite::{DocumentId, FileStream, PageTable, stream};
use tempfile::tempdir;

fn open_memory() -> PageTable<stream::IoStream<std::io::Cursor<Vec<u8>>>> {
    PageTable::open(stream::memory()).unwrap()
}

fn open_file(path: &std::path::Path) -> PageTable<FileStream> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .unwrap();
    PageTable::open(FileStream::new(file)).unwrap()
}

#[test]
fn bind_and_lookup_by_path() {
    let table = open_memory();
    let did = DocumentId::new();
    assert_eq!(table.bind_path("config/settings", &did).unwrap(), None);
    assert_eq!(table.get_document_id_by_path("config/settings").unwrap(), Some(did));
    assert_eq!(table.get_document_id_by_path("config").unwrap(), None);

    let other = DocumentId::new();
    assert_eq!(table.bind_path("config/settings", &other).unwrap(), Some(did));
    assert_eq!(table.get_document_id_by_path("config/settings").unwrap(), Some(other));
}

#[test]
fn search_returns_paths_under_a_prefix() {
    let table = open_memory();
    let did = DocumentId::new();
    table.bind_path("assets/textures/wall", &did).unwrap();
    table.bind_path("assets/textures/floor", &did).unwrap();
    table.bind_path("assets/sounds/door", &did).unwrap();
    table.bind_path("maps/e1m1", &did).unwrap();

    let mut textures = table.search_paths("assets/textures/").unwrap();
    textures.sort();
    assert_eq!(textures, vec!["assets/textures/floor", "assets/textures/wall"]);
    assert_eq!(table.search_paths("assets/").unwrap().len(), 3);
    // A bound path is included in searches for any of its prefixes.
    assert!(table.search_paths("maps").unwrap().contains(&"maps/e1m1".to_string()));
    assert_eq!(table.search_paths("missing/").unwrap().len(), 0);
}

#[test]
fn unbind_path_clears_a_single_binding() {
    let table = open_memory();
    let did = DocumentId::new();
    table.bind_path("a/b", &did).unwrap();
    table.bind_path("a/c", &did).unwrap();
    assert!(table.unbind_path("a/b").unwrap());
    assert!(!table.unbind_path("a/b").unwrap());
    assert_eq!(table.get_document_id_by_path("a/b").unwrap(), None);
    assert_eq!(table.paths_for_document(&did).unwrap(), vec!["a/c"]);
}

#[test]
fn paths_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("paths.db");
    let did = DocumentId::new();
    {
        let table = open_file(&path);
        let end = table.write_stream(&did, &mut &b"payload"[..]).unwrap();
        table.bind_index(&did, end).unwrap();
        table.bind_path("persisted/one", &did).unwrap();
        table.bind_path("persisted/two", &did).unwrap();
        table.unbind_path("persisted/two").unwrap();
    }
    let table = open_file(&path);
    assert_eq!(table.get_document_id_by_path("persisted/one").unwrap(), Some(did));
    assert_eq!(table.get_document_id_by_path("persisted/two").unwrap(), None);
    assert_eq!(table.read_document(&did).unwrap().unwrap(), b"payload");
    let mut paths = table.paths_for_document(&did).unwrap();
    paths.sort();
    assert_eq!(paths, vec!["persisted/one"]);
}

#[test]
fn incremental_saves_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("incremental.db");
    let did = DocumentId::new();
    {
        let table = open_file(&path);
        // Each bind appends new nodes and persists incrementally.
        for i in 0..50 {
            table.bind_path(&format!("inc/path/{i}"), &did).unwrap();
        }
    }
    let table = open_file(&path);
    for i in 0..50 {
        assert_eq!(
            table.get_document_id_by_path(&format!("inc/path/{i}")).unwrap(),
            Some(did),
            "path {i}"
        );
    }
    assert_eq!(table.search_paths("inc/").unwrap().len(), 50);
}

#[test]
fn a_growing_trie_spills_across_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big-trie.db");
    let did = DocumentId::new();
    {
        let table = open_file(&path);
        // Long distinct paths force the trie document past one page.
        for i in 0..200 {
            table
                .bind_path(&format!("very/long/prefix/for/path/number/{i:04}/leaf"), &did)
                .unwrap();
        }
        let report = table.verify().unwrap();
        assert!(report.is_healthy());
        assert!(report.path_chain.pages > 1);
    }
    let table = open_file(&path);
    assert_eq!(table.search_paths("very/").unwrap().len(), 200);
}

#[test]
fn deletes_rewrite_and_reload_cleanly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rewrite.db");
    let did = DocumentId::new();
    {
        let table = open_file(&path);
        for i in 0..20 {
            table.bind_path(&format!("rw/{i}"), &did).unwrap();
        }
        // A delete cannot be expressed as an append; the whole trie
        // document is rewritten and the old chain recycled.
        assert!(table.unbind_path("rw/7").unwrap());
        for i in 20..40 {
            table.bind_path(&format!("rw/{i}"), &did).unwrap();
        }
        assert!(table.unbind_path("rw/33").unwrap());
    }
    let table = open_file(&path);
    let found = table.search_paths("rw/").unwrap();
    assert_eq!(found.len(), 38);
    assert!(!found.contains(&"rw/7".to_string()));
    assert!(!found.contains(&"rw/33".to_string()));
    assert!(table.verify().unwrap().is_healthy());
}

#[test]
fn multiple_paths_can_reference_one_document() {
    let table = open_memory();
    let did = DocumentId::new();
    let end = table.write_stream(&did, &mut &b"shared"[..]).unwrap();
    table.bind_index(&did, end).unwrap();
    table.bind_path("alias/a", &did).unwrap();
    table.bind_path("alias/b", &did).unwrap();
    table.bind_path("alias/c", &did).unwrap();
    let mut paths = table.paths_for_document(&did).unwrap();
    paths.sort();
    assert_eq!(paths, vec!["alias/a", "alias/b", "alias/c"]);
}
