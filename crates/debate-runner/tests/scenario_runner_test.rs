//! Runner integration tests: load scenario files and run them through the
//! protocol with scripted providers.

use std::path::PathBuf;
use std::sync::Arc;

use consensus::{ConsensusMethod, DebateStore, FileDebateStore, ProtocolPhase};
use debate_runner::{build_protocol, render_text, Scenario};

fn bundled(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

#[tokio::test(start_paused = true)]
async fn test_bundled_lease_scenario() {
    let scenario = Scenario::load(&bundled("lease-default.toml")).unwrap();
    let protocol = build_protocol(&scenario).unwrap();

    let run = protocol
        .run(
            &scenario.task.id,
            &scenario.task.description,
            &scenario.task.data,
            &scenario.consensus_config(),
        )
        .await
        .unwrap();

    let outcome = &run.outcome;
    assert_eq!(outcome.method, ConsensusMethod::Unanimous);
    assert!(outcome.achieved);
    let mut supporting = outcome.supporting_agent_ids.clone();
    supporting.sort();
    assert_eq!(supporting, vec!["finance", "legal", "tenant"]);
    assert_eq!(outcome.abstaining_agent_ids, vec!["maintenance".to_string()]);
    assert!(!run.resolutions["risk"].is_valid);
    assert_eq!(run.state.phase, ProtocolPhase::ConsensusReached);

    let report = render_text(&run);
    assert!(report.starts_with("[CONSENSUS] method=unanimous"));
    assert!(report.contains("transcript:"));
    assert!(report.contains("[consensus]"));
}

#[tokio::test]
async fn test_failing_provider_and_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("split.toml");
    std::fs::write(
        &path,
        r#"
[task]
id = "split-vote"
description = "Pick a contractor"

[config]
min_agents_for_consensus = 2

[[agents]]
id = "a"
[agents.analysis]
text = "hire acme roofing"
confidence = 0.8

[[agents]]
id = "b"
[agents.analysis]
text = "hire bolt builders"
confidence = 0.7

[[agents]]
id = "c"
[agents.analysis]
fail = true
"#,
    )
    .unwrap();

    let scenario = Scenario::load(&path).unwrap();
    let store = Arc::new(FileDebateStore::open(dir.path().join("runs")).unwrap());
    let protocol = build_protocol(&scenario).unwrap().with_store(store.clone());

    let run = protocol
        .run(
            &scenario.task.id,
            &scenario.task.description,
            &scenario.task.data,
            &scenario.consensus_config(),
        )
        .await
        .unwrap();

    assert_eq!(run.outcome.abstaining_agent_ids, vec!["c".to_string()]);
    assert!(!run.outcome.achieved);
    assert_eq!(run.outcome.leading_agent_ids, vec!["a".to_string()]);
    assert_eq!(run.outcome.dissenting_agent_ids, vec!["b".to_string()]);

    let stored = store.load("split-vote").unwrap().unwrap();
    assert_eq!(stored.entries.len(), run.entries.len());
    assert!(render_text(&run).contains("dissent:"));
}

#[test]
fn test_missing_scenario_file() {
    let err = Scenario::load(&bundled("does-not-exist.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read scenario"));
}
