mod common;

use common::{Harness, book, config, page_outline};
use folio_core::outline::{OutlineNode, OutlineTarget};
use folio_core::store::SavedProgress;
use folio_core::{CancellationToken, LoadState, ReaderConfig, ReadingSession, SessionHost};

async fn open(harness: &Harness, id: &folio_core::DocumentId) -> ReadingSession {
    ReadingSession::open(
        id.clone(),
        &harness.collaborators(),
        &config(),
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn fixed_layout_jump_persists_page_and_ratio() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 120, Vec::new());
    let mut session = open(&harness, &doc).await;

    assert!(session.jump_to("60").await);

    let position = session.position().unwrap();
    assert_eq!(position.percentage, Some(0.5));
    assert_eq!(position.page, Some(60));
    let saves = harness.progress.saves_for(&doc);
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].identifier, "60");
    assert_eq!(saves[0].percentage, 0.5);
}

#[tokio::test]
async fn reflowable_progress_waits_for_the_index() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("novel", book(40));
    let mut session = open(&harness, &doc).await;
    assert!(session.index().is_building());

    session.next().await.unwrap();
    assert!(harness.progress.saves().is_empty());
    assert_eq!(session.position().unwrap().percentage, None);

    session.wait_for_index().await;

    let saves = harness.progress.saves_for(&doc);
    assert_eq!(saves.len(), 1);
    assert!(saves[0].percentage > 0.0);
    assert_eq!(saves[0].identifier, session.position().unwrap().identifier);
    assert_eq!(session.position().unwrap().percentage, Some(saves[0].percentage));
}

#[tokio::test]
async fn start_of_document_is_never_persisted_from_restore() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("novel", book(3));
    let mut session = open(&harness, &doc).await;
    session.wait_for_index().await;

    assert!(harness.progress.saves().is_empty());
    assert_eq!(session.position().unwrap().percentage, Some(0.0));
}

#[tokio::test]
async fn malformed_outline_entries_stay_listed_without_markers() {
    let harness = Harness::new();
    let mut content = book(8);
    content.toc.push(OutlineNode::new(
        "Lost appendix",
        OutlineTarget::Href("missing/ch99.xhtml".into()),
    ));
    content.toc.push(OutlineNode::new(
        "Ghost",
        OutlineTarget::Href("ghost.xhtml#x".into()),
    ));
    for entry in &mut content.toc {
        entry.children.clear();
    }
    let doc = harness.add_reflowable("novel", content);
    let mut session = open(&harness, &doc).await;
    session.wait_for_index().await;

    assert_eq!(session.outline().len(), 10);
    assert_eq!(session.markers().len(), 8);
    assert!(session.outline().iter().all(|entry| entry.target.is_some()));
    assert!(session.markers().windows(2).all(|pair| pair[0].percentage <= pair[1].percentage));

    let target = session.outline()[3].target.clone().unwrap();
    assert!(session.jump_to(&target).await);
    assert_eq!(
        session.position().unwrap().section.as_deref(),
        Some("OEBPS/ch4.xhtml")
    );
}

#[tokio::test]
async fn fixed_layout_outline_arrives_asynchronously() {
    let harness = Harness::new();
    let mut outline = page_outline(8, 80);
    outline.push(OutlineNode::new("Broken", OutlineTarget::Unresolved));
    outline.push(OutlineNode::new("Beyond", OutlineTarget::Page(500)));
    let doc = harness.add_fixed("manual", 80, outline);
    let mut session = open(&harness, &doc).await;

    session.wait_for_outline().await;

    assert_eq!(session.outline().len(), 10);
    assert_eq!(session.markers().len(), 8);
    assert_eq!(session.markers()[1].percentage, 11.0 / 80.0);
}

#[tokio::test]
async fn bookmark_label_names_chapter_and_percentage() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 100, page_outline(3, 90));
    let mut session = open(&harness, &doc).await;
    session.wait_for_outline().await;

    assert!(session.jump_to("37").await);
    let bookmark = session.add_bookmark().await.unwrap();
    assert_eq!(bookmark.label.as_deref(), Some("Chapter 2 (37%)"));
    assert_eq!(bookmark.identifier, "37");
    assert_eq!(session.bookmarks()[0].id, bookmark.id);

    session.delete_bookmark(bookmark.id).await.unwrap();
    assert!(session.bookmarks().is_empty());
    assert!(harness.bookmarks.stored(&doc).is_empty());
}

#[tokio::test]
async fn bookmarks_are_navigable() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("novel", book(5));
    let mut session = open(&harness, &doc).await;
    session.wait_for_index().await;

    assert!(session.jump_to("ch3.xhtml#mid").await);
    let marked = session.position().unwrap().identifier.clone();
    let bookmark = session.add_bookmark().await.unwrap();
    assert!(bookmark.label.unwrap().starts_with("Chapter 3"));

    assert!(session.jump_to_percentage(0.0).await);
    assert!(session.jump_to_bookmark(bookmark.id).await);
    assert_eq!(session.position().unwrap().identifier, marked);
}

#[tokio::test]
async fn switching_documents_drops_late_writes() {
    let harness = Harness::new();
    let first = harness.add_reflowable("first", book(60));
    let second = harness.add_fixed("second", 10, Vec::new());
    let mut host = SessionHost::new(harness.collaborators(), config());

    let session = host.open(first.clone()).await.unwrap();
    assert!(session.index().is_building());
    session.next().await.unwrap();

    let session = host.open(second.clone()).await.unwrap();
    assert!(session.jump_to("4").await);
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
    host.active().unwrap().pump().await;

    assert!(harness.progress.saves_for(&first).is_empty());
    assert_eq!(harness.progress.saves_for(&second).len(), 1);
    assert_eq!(host.snapshot().unwrap().document_id, second);
}

#[tokio::test]
async fn next_then_prev_returns_to_the_same_unit() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("novel", book(4));
    let mut session = open(&harness, &doc).await;

    session.next().await.unwrap();
    session.next().await.unwrap();
    let here = session.position().unwrap().identifier.clone();
    session.next().await.unwrap();
    session.prev().await.unwrap();
    assert_eq!(session.position().unwrap().identifier, here);

    assert!(session.jump_to("ch1.xhtml").await);
    let start = session.position().unwrap().identifier.clone();
    session.prev().await.unwrap();
    assert_eq!(session.position().unwrap().identifier, start);
}

#[tokio::test]
async fn fixed_layout_paging_is_clamped() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 3, Vec::new());
    let mut session = open(&harness, &doc).await;

    session.prev().await.unwrap();
    assert_eq!(session.position().unwrap().page, Some(1));
    session.next().await.unwrap();
    session.prev().await.unwrap();
    assert_eq!(session.position().unwrap().page, Some(1));

    assert!(session.jump_to("3").await);
    session.next().await.unwrap();
    assert_eq!(session.position().unwrap().page, Some(3));
}

#[tokio::test]
async fn invalid_jumps_leave_state_untouched() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 10, Vec::new());
    let mut session = open(&harness, &doc).await;
    assert!(session.jump_to("5").await);
    let before = session.position().cloned();

    for target in ["0", "11", "five", "epubcfi(/6/2!/4:0)", ""] {
        assert!(!session.jump_to(target).await, "{target}");
    }
    assert_eq!(session.position().cloned(), before);
    assert_eq!(harness.progress.saves_for(&doc).len(), 1);
}

#[tokio::test]
async fn content_failure_is_a_blocking_load_error() {
    let harness = Harness::new();
    harness.source.insert("broken", "Broken", "EPUB", None);
    let mut host = SessionHost::new(harness.collaborators(), config());

    let err = host.open("broken".into()).await.err().unwrap();
    assert_eq!(err.category(), "load");
    let snapshot = host.snapshot().unwrap();
    assert_eq!(snapshot.state, LoadState::Error);
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn save_failures_are_contained_and_retried() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 20, Vec::new());
    let mut session = open(&harness, &doc).await;

    harness.progress.set_failing(true);
    assert!(session.jump_to("10").await);
    assert_eq!(session.position().unwrap().page, Some(10));

    harness.progress.set_failing(false);
    session.next().await.unwrap();
    let saves = harness.progress.saves_for(&doc);
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].identifier, "11");
}

#[tokio::test]
async fn saved_position_is_restored_without_a_write() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 50, Vec::new());
    harness.progress.insert(
        doc.clone(),
        SavedProgress {
            identifier: Some("42".into()),
            percentage: 0.84,
            finished: false,
            last_read: None,
        },
    );
    let session = open(&harness, &doc).await;

    assert_eq!(session.position().unwrap().identifier, "42");
    assert!(harness.progress.saves().is_empty());
}

#[tokio::test]
async fn default_progress_row_starts_at_the_beginning() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 50, Vec::new());
    harness.progress.insert(
        doc.clone(),
        SavedProgress {
            identifier: None,
            percentage: 0.0,
            finished: false,
            last_read: None,
        },
    );
    let session = open(&harness, &doc).await;
    assert_eq!(session.position().unwrap().page, Some(1));
}

#[tokio::test]
async fn unusable_saved_position_falls_back_to_start() {
    let harness = Harness::new();
    let doc = harness.add_fixed("manual", 50, Vec::new());
    harness.progress.insert(
        doc.clone(),
        SavedProgress {
            identifier: Some("epubcfi(/6/4!/4:0)".into()),
            percentage: 0.3,
            finished: false,
            last_read: None,
        },
    );
    let session = open(&harness, &doc).await;
    assert_eq!(session.position().unwrap().page, Some(1));
}

#[tokio::test]
async fn font_size_changes_keep_the_section() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("novel", book(3));
    let mut session = open(&harness, &doc).await;
    assert!(session.jump_to("ch2.xhtml#mid").await);

    session.set_font_size(30).await.unwrap();

    assert_eq!(session.font_size(), 30);
    assert_eq!(
        session.position().unwrap().section.as_deref(),
        Some("OEBPS/ch2.xhtml")
    );
}

#[tokio::test]
async fn paging_to_the_last_screen_marks_the_book_finished() {
    let harness = Harness::new();
    let doc = harness.add_reflowable("short", book(3));
    let mut session = ReadingSession::open(
        doc.clone(),
        &harness.collaborators(),
        &ReaderConfig::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    session.wait_for_index().await;

    for _ in 0..50 {
        session.next().await.unwrap();
    }

    let position = session.position().unwrap();
    assert!(position.at_end);
    assert!(position.percentage.unwrap() < 0.99);
    let last = harness.progress.saves_for(&doc).pop().unwrap();
    assert!(last.finished);
    assert!(session.snapshot().finished);
}
