//! End-to-end runs through `PipelineService` against in-process services.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use ferroprot_common::TierKey;
use ferroprot_jobs::ServiceError;
use ferroprot_pipeline::dry_run::SimulatedJobService;
use ferroprot_pipeline::{Stage, StageOutcome, StageRequest};
use ferroprot_store::{RunState, RunStatus, RunStatusStore};
use ferroprot_test_utils::{FailingService, RecordingService};

use common::{event_kinds, request, service};

#[tokio::test]
async fn test_dry_run_produces_every_artifact() {
    // Dry runs must never reach the configured backend.
    let real = Arc::new(FailingService::rejecting(ServiceError::fatal("configured backend used")));
    let (_dir, store, svc) = service(real);

    let report = svc.run(Some("dry_e2e"), request(json!({ "dry_run": true }))).await;
    assert_eq!(report.error, None);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.stage, "novelty");
    assert!(!report.rejected);

    for rel in [
        "request.json",
        "status.json",
        "events.jsonl",
        "summary.json",
        "target.fasta",
        "target.pdb",
        "jobs/msa.json",
        "msa/result.a3m",
        "msa/result.tsv",
        "msa/quality.json",
        "conservation.json",
        "ligand_mask.json",
        "query_pdb_alignment.json",
        "tiers/30/fixed_positions.json",
        "tiers/30/designs.json",
        "tiers/30/designs.fasta",
        "tiers/30/fixed_positions_check.json",
        "tiers/30/soluprot.json",
        "tiers/30/designs_filtered.fasta",
        "tiers/30/af2/s1/ranking_debug.json",
        "tiers/30/af2/s1/ranked_0.pdb",
        "tiers/30/af2/s1/metrics.json",
        "tiers/30/af2_scores.json",
        "tiers/30/af2_selected.fasta",
        "tiers/30/novelty.tsv",
        "stages/novelty.json",
    ] {
        assert!(store.exists("dry_e2e", rel), "missing artifact {rel}");
    }

    let summary = report.summary.expect("summary");
    assert!(summary.target.derived_query);
    assert_eq!(summary.target.design_chains, vec!["A".to_string()]);
    assert!(summary.stages.values().all(|o| *o == StageOutcome::Executed));
    let tier = &summary.tiers[&TierKey(30)];
    assert_eq!(tier.designs, 2);
    assert_eq!(tier.soluprot_passed, 1);
    assert_eq!(tier.af2_selected, vec!["s1".to_string()]);
    assert_eq!(tier.novelty_hits, Some(1));
    // The zinc ion sits next to residues 1 and 2.
    assert!(tier.fixed["A"] >= 2);

    let fixed: Value = store.read_json("dry_e2e", "tiers/30/fixed_positions.json").unwrap();
    let ligand: Vec<u64> = serde_json::from_value(fixed["chains"]["A"]["ligand"].clone()).unwrap();
    assert_eq!(ligand, vec![1, 2]);

    let kinds = event_kinds(&store, "dry_e2e");
    assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
    assert_eq!(kinds.last().map(String::as_str), Some("run_completed"));
    assert!(kinds.iter().any(|k| k == "job_submitted"));
}

#[tokio::test]
async fn test_second_invocation_reuses_every_stage() {
    let (_dir, _store, svc) = service(Arc::new(SimulatedJobService::new()));
    let first = svc.run(Some("repeat"), request(json!({ "dry_run": true }))).await;
    assert_eq!(first.state, RunState::Completed);

    let second = svc.run(Some("repeat"), request(json!({ "dry_run": true }))).await;
    assert_eq!(second.state, RunState::Completed);
    let summary = second.summary.unwrap();
    assert!(summary.stages.values().all(|o| *o == StageOutcome::Cached), "{:?}", summary.stages);
    assert_eq!(summary.tiers[&TierKey(30)].af2_selected, vec!["s1".to_string()]);
}

#[tokio::test]
async fn test_extending_stop_after_resumes_from_first_new_stage() {
    let recorder = Arc::new(RecordingService::new(Arc::new(SimulatedJobService::new())));
    let (_dir, store, svc) = service(recorder.clone());

    let report = svc.run(Some("resume"), request(json!({ "stop_after": "conservation" }))).await;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.stage, "conservation");
    assert_eq!(recorder.submit_count_for("mmseqs"), 1);
    assert_eq!(recorder.submit_count_for("proteinmpnn"), 0);
    assert!(!store.exists("resume", "tiers/30/designs.json"));

    let report = svc.run(Some("resume"), request(json!({ "stop_after": "design" }))).await;
    assert_eq!(report.state, RunState::Completed);
    let stages = report.summary.unwrap().stages;
    assert_eq!(stages[&Stage::Msa], StageOutcome::Cached);
    assert_eq!(stages[&Stage::Conservation], StageOutcome::Cached);
    assert_eq!(stages[&Stage::LigandMask], StageOutcome::Executed);
    assert_eq!(stages[&Stage::Design], StageOutcome::Executed);
    assert!(!stages.contains_key(&Stage::Soluprot));
    assert_eq!(recorder.submit_count_for("mmseqs"), 1);
    assert_eq!(recorder.submit_count_for("proteinmpnn"), 1);

    // stop_after alone is not a request change.
    assert!(!event_kinds(&store, "resume").iter().any(|k| k == "request_changed"));
}

#[tokio::test]
async fn test_changed_request_is_recorded_and_force_resubmits() {
    let recorder = Arc::new(RecordingService::new(Arc::new(SimulatedJobService::new())));
    let (_dir, store, svc) = service(recorder.clone());

    svc.run(Some("changes"), request(json!({ "stop_after": "msa" }))).await;
    let report = svc.run(Some("changes"), request(json!({ "stop_after": "msa", "mmseqs_max_seqs": 500 }))).await;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(recorder.submit_count_for("mmseqs"), 2);
    assert!(event_kinds(&store, "changes").iter().any(|k| k == "request_changed"));

    let report = svc.run(Some("changes"), request(json!({ "stop_after": "msa", "mmseqs_max_seqs": 500, "force": true }))).await;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(recorder.submit_count_for("mmseqs"), 3);
}

#[tokio::test]
async fn test_running_run_is_rejected_unless_forced() {
    let (_dir, store, svc) = service(Arc::new(SimulatedJobService::new()));
    let status = RunStatusStore::new(store.clone());
    status.set_status(RunStatus::new("busy", "design", RunState::Running)).unwrap();

    let report = svc.run(Some("busy"), request(json!({ "dry_run": true }))).await;
    assert!(report.rejected);
    assert_eq!(report.state, RunState::Running);
    assert_eq!(report.error.unwrap().kind, "run_in_progress");
    assert_eq!(status.get_status("busy").unwrap().stage, "design");
    assert!(!store.exists("busy", "events.jsonl"));

    let report = svc.run(Some("busy"), request(json!({ "dry_run": true, "force": true, "stop_after": "msa" }))).await;
    assert!(!report.rejected);
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn test_validation_failure_is_written_to_status() {
    let (_dir, store, svc) = service(Arc::new(SimulatedJobService::new()));
    let req = StageRequest::from_value(json!({ "target_fasta": ">q\nMKVLA", "stop_after": "design" })).unwrap();

    let report = svc.run(Some("invalid"), req).await;
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.stage, "validate");
    assert_eq!(report.error.as_ref().unwrap().kind, "validation_error");

    let status = svc.status("invalid").unwrap();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.error_kind.as_deref(), Some("validation_error"));
    assert_eq!(event_kinds(&store, "invalid"), vec!["run_failed".to_string()]);
}

#[tokio::test]
async fn test_unsafe_run_id_is_rejected() {
    let (_dir, _store, svc) = service(Arc::new(SimulatedJobService::new()));
    let report = svc.run(Some("../escape"), request(json!({ "dry_run": true }))).await;
    assert!(report.rejected);
    assert_eq!(report.state, RunState::NotFound);
    assert!(svc.list_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_generated_run_ids_are_listed() {
    let (_dir, _store, svc) = service(Arc::new(SimulatedJobService::new()));
    let report = svc.run(None, request(json!({ "dry_run": true, "stop_after": "msa" }))).await;
    assert!(report.run_id.starts_with("pipeline_"));
    let runs = svc.list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
    assert_eq!(runs[0].state, RunState::Completed);
}

#[tokio::test]
async fn test_atoms_without_coordinates_are_excluded_from_the_mask() {
    use ferroprot_bio::structure::{format_atom_line, RecordKind};
    use ferroprot_test_utils::fixtures::zinc_site_pdb;

    // A second zinc with blank x/y/z; parsed as the origin it would touch residue 1.
    let mut blank = format_atom_line(RecordKind::Hetatm, 99, "ZN", "ZN", "A", 901, [0.0; 3], "ZN");
    blank.replace_range(30..54, &" ".repeat(24));
    let pdb = zinc_site_pdb(common::TARGET_SEQUENCE).replace("END\n", &format!("{blank}\nEND\n"));

    let (_dir, store, svc) = service(Arc::new(SimulatedJobService::new()));
    let req = request(json!({ "target_pdb": pdb, "stop_after": "ligand_mask" }));
    let report = svc.run(Some("blank_coords"), req).await;

    assert_eq!(report.state, RunState::Completed);
    assert!(report.warnings.iter().any(|w| w.contains("without coordinates")));

    let mask: Value = store.read_json("blank_coords", "ligand_mask.json").unwrap();
    assert_eq!(mask["ligand_atom_count"], 1);
    assert_eq!(mask["skipped_atom_count"], 1);
    let stamp: Value = store.read_json("blank_coords", "stages/ligand_mask.json").unwrap();
    assert_eq!(stamp["notes"]["skipped_atoms"], 1);
}
