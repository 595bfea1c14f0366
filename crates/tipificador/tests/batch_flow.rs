//! Batch orchestration: admission, the worker loop, cancellation, retry,
//! reconciliation.
//!
//! The worker is exercised both directly (`run_worker`, for deterministic
//! sequencing) and through `start` with polling, which is how the HTTP layer
//! drives it. The cancellation test holds the second package on a gate inside
//! the mock PDF engine, flips the cancel flag, then releases the gate.

mod common;

use std::io::Write;
use std::time::Duration;

use common::{Gate, MockPage, MockPdfEngine, mock_pdf_string, test_state, test_state_with_engine, zip_entry_names};
use tempfile::TempDir;
use tipificador::TipificadorError;
use tipificador::api::AppState;
use tipificador::types::{BatchStatus, PackageStatus};
use zip::write::SimpleFileOptions;

fn fev_doc(code: &str) -> Vec<MockPage> {
    vec![MockPage::embedded(&format!(
        "FACTURA ELECTRONICA DE VENTA\nNIT: 900.204.617-5\nOCFE {code}"
    ))]
}

/// Build a batch archive in memory: `(folder, [(file name, content)])`.
fn batch_zip(packages: &[(&str, Vec<(&str, String)>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (folder, files) in packages {
        for (name, content) in files {
            writer
                .start_file(format!("{folder}/{name}"), options)
                .expect("zip entry");
            writer.write_all(content.as_bytes()).expect("zip write");
        }
    }
    writer.finish().expect("zip finish").into_inner()
}

async fn admit_batch(state: &AppState, archive: Vec<u8>) -> String {
    let batch_id = state.batch.admit().expect("batch skeleton");
    tokio::fs::write(state.batch.archive_path(&batch_id), archive)
        .await
        .expect("archive written");
    state
        .batch
        .register(&batch_id)
        .await
        .expect("batch registration")
        .batch_id
}

async fn wait_until<F>(state: &AppState, batch_id: &str, timeout: Duration, predicate: F)
where
    F: Fn(&tipificador::BatchMeta) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(meta) = state.store.read_batch_meta(batch_id)
            && predicate(&meta)
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch {batch_id} did not reach the expected state in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_admission_discovers_sorted_packages() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[
        ("pkg_b", vec![("doc.pdf", mock_pdf_string(&fev_doc("2000")))]),
        ("pkg_a", vec![("doc.pdf", mock_pdf_string(&fev_doc("1000")))]),
        ("__MACOSX", vec![("junk.pdf", "junk".to_string())]),
    ]);
    let batch_id = admit_batch(&state, archive).await;

    let meta = state.store.read_batch_meta(&batch_id).unwrap();
    assert_eq!(meta.status, BatchStatus::Ready);
    let names: Vec<_> = meta.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["pkg_a", "pkg_b"]);
    assert!(meta.packages.iter().all(|p| p.status == PackageStatus::Pending));
}

#[tokio::test]
async fn test_admission_rejects_archive_without_folders() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("loose.pdf", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"%PDF").unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let batch_id = state.batch.admit().unwrap();
    tokio::fs::write(state.batch.archive_path(&batch_id), archive)
        .await
        .unwrap();
    let err = state.batch.register(&batch_id).await.unwrap_err();
    assert!(matches!(err, TipificadorError::BadInput(_)));
    assert!(!state.store.batch_dir(&batch_id).exists());
}

#[tokio::test]
async fn test_worker_processes_every_package_and_consolidates() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[
        ("pkg_a", vec![("doc.pdf", mock_pdf_string(&fev_doc("1111")))]),
        ("pkg_b", vec![("doc.pdf", mock_pdf_string(&fev_doc("2222")))]),
    ]);
    let batch_id = admit_batch(&state, archive).await;

    state.batch.start(&batch_id).unwrap();
    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.status == BatchStatus::Done
    })
    .await;

    let meta = state.store.read_batch_meta(&batch_id).unwrap();
    for (package, expected) in meta.packages.iter().zip(["OCFE1111.zip", "OCFE2222.zip"]) {
        assert_eq!(package.status, PackageStatus::Done);
        assert_eq!(package.download_name.as_deref(), Some(expected));
        assert!(package.job_id.is_some());
        let result_file = package.result_file.as_ref().unwrap();
        assert!(state.store.results_dir(&batch_id).join(result_file).exists());
    }

    let all = tokio::fs::read(state.batch.all_zip_path(&batch_id).unwrap())
        .await
        .unwrap();
    assert_eq!(zip_entry_names(&all), vec!["OCFE1111.zip", "OCFE2222.zip"]);
}

#[tokio::test]
async fn test_package_failure_does_not_halt_the_batch() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[
        ("pkg_bad", vec![("readme.txt", "no pdfs here".to_string())]),
        ("pkg_good", vec![("doc.pdf", mock_pdf_string(&fev_doc("3333")))]),
    ]);
    let batch_id = admit_batch(&state, archive).await;

    state.batch.start(&batch_id).unwrap();
    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.status == BatchStatus::Partial
    })
    .await;

    let meta = state.store.read_batch_meta(&batch_id).unwrap();
    let bad = meta.package("pkg_bad").unwrap();
    assert_eq!(bad.status, PackageStatus::Error);
    assert!(bad.error.as_deref().unwrap().contains("no PDFs"));
    let good = meta.package("pkg_good").unwrap();
    assert_eq!(good.status, PackageStatus::Done);

    let all = tokio::fs::read(state.batch.all_zip_path(&batch_id).unwrap())
        .await
        .unwrap();
    assert_eq!(zip_entry_names(&all), vec!["OCFE3333.zip"]);
}

#[tokio::test]
async fn test_cancel_mid_run_drains_cooperatively() {
    let dir = TempDir::new().unwrap();
    let gate = Gate::new();
    let state = test_state_with_engine(
        dir.path(),
        MockPdfEngine::with_gate("PKG2-MARKER", gate.clone()),
    );

    let mut second = fev_doc("2222");
    second[0].embedded.push_str("\nPKG2-MARKER");
    let archive = batch_zip(&[
        ("pkg1", vec![("doc.pdf", mock_pdf_string(&fev_doc("1111")))]),
        ("pkg2", vec![("doc.pdf", mock_pdf_string(&second))]),
        ("pkg3", vec![("doc.pdf", mock_pdf_string(&fev_doc("3333")))]),
    ]);
    let batch_id = admit_batch(&state, archive).await;

    state.batch.start(&batch_id).unwrap();
    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.package("pkg1").is_some_and(|p| p.status == PackageStatus::Done)
    })
    .await;

    let meta = state.batch.cancel(&batch_id).unwrap();
    assert_eq!(meta.status, BatchStatus::Cancelling);
    gate.release();

    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.status == BatchStatus::Cancelled
    })
    .await;

    let meta = state.store.read_batch_meta(&batch_id).unwrap();
    assert!(!meta.cancel_requested);
    assert_eq!(meta.package("pkg1").unwrap().status, PackageStatus::Done);
    assert_eq!(meta.package("pkg2").unwrap().status, PackageStatus::Cancelled);
    assert_eq!(meta.package("pkg3").unwrap().status, PackageStatus::Cancelled);

    // The consolidated archive holds exactly the finished package.
    let all = tokio::fs::read(state.batch.all_zip_path(&batch_id).unwrap())
        .await
        .unwrap();
    assert_eq!(zip_entry_names(&all), vec!["OCFE1111.zip"]);
}

#[tokio::test]
async fn test_cancel_before_start_goes_straight_to_cancelled() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[(
        "pkg1",
        vec![("doc.pdf", mock_pdf_string(&fev_doc("1111")))],
    )]);
    let batch_id = admit_batch(&state, archive).await;

    let meta = state.batch.cancel(&batch_id).unwrap();
    assert_eq!(meta.status, BatchStatus::Cancelled);
    assert!(!meta.cancel_requested);
}

#[tokio::test]
async fn test_retry_errors_reprocesses_only_failed_packages() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[
        ("pkg_bad", vec![("readme.txt", "no pdfs".to_string())]),
        ("pkg_good", vec![("doc.pdf", mock_pdf_string(&fev_doc("4444")))]),
    ]);
    let batch_id = admit_batch(&state, archive).await;

    state.batch.start(&batch_id).unwrap();
    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.status == BatchStatus::Partial
    })
    .await;

    // Drop the missing PDF into place, then retry the failed package.
    let fixed = state.store.input_dir(&batch_id).join("pkg_bad/doc.pdf");
    std::fs::write(&fixed, mock_pdf_string(&fev_doc("5555"))).unwrap();

    let retried = state.batch.retry_errors(&batch_id).unwrap();
    assert_eq!(retried, 1);
    wait_until(&state, &batch_id, Duration::from_secs(10), |meta| {
        meta.status == BatchStatus::Done
    })
    .await;

    let meta = state.store.read_batch_meta(&batch_id).unwrap();
    assert_eq!(meta.package("pkg_bad").unwrap().status, PackageStatus::Done);
    assert_eq!(
        meta.package("pkg_bad").unwrap().download_name.as_deref(),
        Some("OCFE5555.zip")
    );

    // Nothing left to retry.
    assert_eq!(state.batch.retry_errors(&batch_id).unwrap(), 0);
}

#[tokio::test]
async fn test_reconciliation_trusts_result_files_on_disk() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[(
        "pkg1",
        vec![("doc.pdf", mock_pdf_string(&fev_doc("1111")))],
    )]);
    let batch_id = admit_batch(&state, archive).await;

    // Simulate a worker that died after writing the result file but before
    // updating the metadata.
    std::fs::write(
        state.store.results_dir(&batch_id).join("pkg1.zip"),
        b"zipbytes",
    )
    .unwrap();

    let meta = state.batch.status(&batch_id).unwrap();
    assert_eq!(meta.package("pkg1").unwrap().status, PackageStatus::Done);
    assert_eq!(meta.status, BatchStatus::Done);

    // The derived state was persisted.
    let stored = state.store.read_batch_meta(&batch_id).unwrap();
    assert_eq!(stored.status, BatchStatus::Done);
}

#[tokio::test]
async fn test_package_download_requires_done_status() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let archive = batch_zip(&[(
        "pkg1",
        vec![("doc.pdf", mock_pdf_string(&fev_doc("1111")))],
    )]);
    let batch_id = admit_batch(&state, archive).await;

    let err = state.batch.package_zip_path(&batch_id, "pkg1").unwrap_err();
    assert!(matches!(err, TipificadorError::NotFound(_)));
    let err = state.batch.all_zip_path(&batch_id).unwrap_err();
    assert!(matches!(err, TipificadorError::NotFound(_)));
}
