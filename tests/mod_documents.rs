use std::io::{Read, Seek, SeekFrom};

use pagelite::types::{NO_PAGE, PAGE_PAYLOAD_SIZE};
use pagelite::{DbError, DocumentId, PageTable, stream};

const POEM: &[u8] = b"If you can keep your head when all about you \
Are losing theirs and blaming it on you, \
If you can trust yourself when all men doubt you, \
But make allowance for their doubting too;";

fn open_memory() -> PageTable<stream::IoStream<std::io::Cursor<Vec<u8>>>> {
    PageTable::open(stream::memory()).unwrap()
}

#[test]
fn write_then_read_by_id_and_path() {
    let table = open_memory();
    let blob = &POEM[..151];
    let did = DocumentId::new();
    let end = table.write_stream(&did, &mut &blob[..]).unwrap();
    assert_eq!(table.bind_index(&did, end).unwrap(), NO_PAGE);
    assert_eq!(table.bind_path("/my/path/to/poem", &did).unwrap(), None);

    let by_id = table.read_document(&did).unwrap().unwrap();
    assert_eq!(by_id, blob);

    let found = table.get_document_id_by_path("/my/path/to/poem").unwrap().unwrap();
    assert_eq!(found, did);
    let by_path = table.read_document(&found).unwrap().unwrap();
    assert_eq!(by_path, blob);
}

#[test]
fn multi_page_documents_round_trip() {
    let table = open_memory();
    // Three pages and a bit, with a recognisable pattern.
    let blob: Vec<u8> =
        (0..PAGE_PAYLOAD_SIZE * 3 + 511).map(|i| (i % 251) as u8).collect();
    let did = DocumentId::new();
    let end = table.write_stream(&did, &mut &blob[..]).unwrap();
    table.bind_index(&did, end).unwrap();
    assert_eq!(table.read_document(&did).unwrap().unwrap(), blob);

    // The chain stream agrees on length and supports seeking.
    let mut chain = table.get_stream(end).unwrap();
    assert_eq!(chain.len(), blob.len() as u64);
    assert_eq!(chain.page_count(), 4);
    chain.seek(SeekFrom::Start(PAGE_PAYLOAD_SIZE as u64 - 3)).unwrap();
    let mut buf = [0u8; 6];
    chain.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, &blob[PAGE_PAYLOAD_SIZE - 3..PAGE_PAYLOAD_SIZE + 3]);

    // Relative seeks clamp at the total length.
    let clamped = chain.seek(SeekFrom::Current(i64::MAX / 2)).unwrap();
    assert_eq!(clamped, blob.len() as u64);
    assert_eq!(chain.read(&mut buf).unwrap(), 0);
}

#[test]
fn page_boundary_sizes_round_trip() {
    let table = open_memory();
    for size in [1, PAGE_PAYLOAD_SIZE - 1, PAGE_PAYLOAD_SIZE, PAGE_PAYLOAD_SIZE + 1] {
        let blob = vec![0xABu8; size];
        let did = DocumentId::new();
        let end = table.write_stream(&did, &mut &blob[..]).unwrap();
        table.bind_index(&did, end).unwrap();
        assert_eq!(table.read_document(&did).unwrap().unwrap(), blob, "size {size}");
    }
}

#[test]
fn empty_documents_are_rejected() {
    let table = open_memory();
    let did = DocumentId::new();
    let err = table.write_stream(&did, &mut std::io::empty()).unwrap_err();
    assert!(matches!(err, DbError::EmptyPayload));
}

#[test]
fn reserved_ids_are_rejected() {
    let table = open_memory();
    let blob = b"x".to_vec();
    for did in [DocumentId::nil(), DocumentId::index_root()] {
        assert!(matches!(
            table.write_stream(&did, &mut &blob[..]),
            Err(DbError::InvalidDocumentId(_))
        ));
        assert!(matches!(table.bind_index(&did, 4), Err(DbError::InvalidDocumentId(_))));
        assert!(matches!(
            table.bind_path("reserved", &did),
            Err(DbError::InvalidDocumentId(_))
        ));
    }
}

#[test]
fn rebinding_keeps_two_versions_then_expires() {
    let table = open_memory();
    let did = DocumentId::new();

    let v1 = table.write_stream(&did, &mut &b"version one"[..]).unwrap();
    assert_eq!(table.bind_index(&did, v1).unwrap(), NO_PAGE);

    let v2 = table.write_stream(&did, &mut &b"version two"[..]).unwrap();
    // Second version fills the free slot; nothing expires yet.
    assert_eq!(table.bind_index(&did, v2).unwrap(), NO_PAGE);
    assert_eq!(table.read_document(&did).unwrap().unwrap(), b"version two");

    let v3 = table.write_stream(&did, &mut &b"version three"[..]).unwrap();
    // Third version overwrites the older slot and hands back its chain.
    assert_eq!(table.bind_index(&did, v3).unwrap(), v1);
    table.release_chain(v1).unwrap();
    assert_eq!(table.read_document(&did).unwrap().unwrap(), b"version three");
}

#[test]
fn unbound_documents_read_as_absent() {
    let table = open_memory();
    assert_eq!(table.read_document(&DocumentId::new()).unwrap(), None);
    assert_eq!(table.get_document_head(&DocumentId::new()).unwrap(), None);
    assert_eq!(table.get_document_id_by_path("nowhere").unwrap(), None);
}

#[test]
fn unbind_index_forgets_the_document() {
    let table = open_memory();
    let did = DocumentId::new();
    let end = table.write_stream(&did, &mut &b"data"[..]).unwrap();
    table.bind_index(&did, end).unwrap();
    assert!(table.unbind_index(&did).unwrap());
    assert!(!table.unbind_index(&did).unwrap());
    assert_eq!(table.read_document(&did).unwrap(), None);
}

#[test]
fn delete_document_releases_chains_and_paths() {
    let table = open_memory();
    let did = DocumentId::new();
    // Three pages, so the release outweighs the trie rewrite that may
    // recycle one of them.
    let blob = vec![0x21u8; PAGE_PAYLOAD_SIZE * 2 + 100];
    let end = table.write_stream(&did, &mut &blob[..]).unwrap();
    table.bind_index(&did, end).unwrap();
    table.bind_path("poems/if", &did).unwrap();
    table.bind_path("poems/kipling/if", &did).unwrap();

    let free_before = table.count_free_pages().unwrap();
    assert!(table.delete_document(&did).unwrap());
    assert!(!table.delete_document(&did).unwrap());
    assert_eq!(table.read_document(&did).unwrap(), None);
    assert_eq!(table.get_document_id_by_path("poems/if").unwrap(), None);
    assert_eq!(table.paths_for_document(&did).unwrap(), Vec::<String>::new());
    assert!(table.count_free_pages().unwrap() > free_before);
}

#[test]
fn many_documents_spill_into_new_index_pages() {
    let table = open_memory();
    let mut dids = Vec::new();
    // Far more than one 126-slot page can hold, with degenerate ordering
    // mixed in.
    for i in 0..400u32 {
        let did = DocumentId::new();
        let blob = i.to_le_bytes();
        let end = table.write_stream(&did, &mut &blob[..]).unwrap();
        table.bind_index(&did, end).unwrap();
        dids.push((did, blob));
    }
    for (did, blob) in &dids {
        assert_eq!(table.read_document(did).unwrap().unwrap(), blob);
    }
    let report = table.verify().unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.documents, 400);
    assert!(report.index_chain.pages > 1);
}
