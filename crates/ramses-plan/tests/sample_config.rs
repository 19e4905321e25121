//! The sample configuration shipped in `config/` plans cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use ramses_knowledge::{AdaptationOption, InMemoryKnowledge, Knowledge, OptionKind, SystemArchitecture};
use ramses_plan::{ChannelExecute, PlanConfig, Planner};

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

#[tokio::test]
async fn sample_files_run_one_iteration() {
    let dir = config_dir();
    let config = PlanConfig::from_file(&dir.join("plan.toml")).unwrap();
    assert_eq!(config, PlanConfig::default());

    let architecture = SystemArchitecture::from_file(&dir.join("architecture.json")).unwrap();
    let knowledge = Arc::new(InMemoryKnowledge::with_services(architecture.services).unwrap());
    let proposals: Vec<AdaptationOption> =
        serde_json::from_str(&std::fs::read_to_string(dir.join("proposals.json")).unwrap()).unwrap();
    assert_eq!(proposals.len(), 2);
    for option in proposals {
        knowledge.propose_option(option).unwrap();
    }

    let (execute, mut execute_rx) = ChannelExecute::channel();
    let shared: Arc<dyn Knowledge> = knowledge.clone();
    let mut planner = Planner::from_config(&config, shared, Arc::new(execute));
    let outcome = planner.run_iteration().await.unwrap();

    let chosen: Vec<&AdaptationOption> = outcome.chosen.values().flatten().collect();
    assert_eq!(chosen.len(), 1);
    assert!(chosen[0].is_resolved());
    if let OptionKind::ChangeImplementation { new_implementation_id, .. } = &chosen[0].kind {
        assert_eq!(new_implementation_id.as_deref(), Some("payment-proxy-2"));
    }
    assert!(outcome.invalidated.contains(&"ORDERING-SERVICE".to_string()));
    assert!(execute_rx.try_recv().is_ok());
}
