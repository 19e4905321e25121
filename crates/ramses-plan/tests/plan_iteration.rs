//! End-to-end planning iterations against the in-memory Knowledge store.

use std::collections::BTreeMap;
use std::sync::Arc;

use ramses_knowledge::{
    AdaptationOption, ChosenOptions, Instance, InstanceStatus, InMemoryKnowledge, Knowledge,
    KnowledgeError, KnowledgeResult, LoadBalancerKind, Module, OptionKind, OptionsByService,
    QosKind, QosSpecification, QosThreshold, Service, ServiceId, ServiceImplementation,
};
use ramses_plan::{ChannelExecute, PlanConfig, PlanError, PlanPhase, PlanRunner, Planner};
use tokio::sync::{mpsc, watch};

const ORDERING: &str = "ORDERING-SERVICE";
const PAYMENT: &str = "PAYMENT-PROXY-SERVICE";
const DELIVERY: &str = "DELIVERY-PROXY-SERVICE";
const RESTAURANT: &str = "RESTAURANT-SERVICE";

fn implementation(id: &str, score: f64, availability: f64, response_time: f64, vulnerability: f64) -> ServiceImplementation {
    ServiceImplementation::new(id, score)
        .with_benchmark(QosKind::Availability, availability)
        .with_benchmark(QosKind::AverageResponseTime, response_time)
        .with_vulnerability_score(vulnerability)
}

fn service(
    id: &str,
    dependencies: &[&str],
    implementations: Vec<ServiceImplementation>,
    availability: f64,
    response_time: f64,
) -> Service {
    let current = implementations[0].implementation_id.clone();
    let mut service = Service::new(
        id,
        current,
        implementations,
        dependencies.iter().map(|d| d.to_string()),
    )
    .unwrap()
    .with_load_balancer(LoadBalancerKind::WeightedRandom)
    .with_qos_specification(QosKind::Availability, QosSpecification::new(0.4, QosThreshold::Min(0.9)))
    .with_qos_specification(
        QosKind::AverageResponseTime,
        QosSpecification::new(0.4, QosThreshold::Max(500.0)),
    )
    .with_qos_specification(QosKind::Vulnerability, QosSpecification::new(0.2, QosThreshold::Max(30.0)));
    service.qos.set_current_value(QosKind::Availability, availability, 0);
    service.qos.set_current_value(QosKind::AverageResponseTime, response_time, 0);
    service
}

fn with_instances(implementation: ServiceImplementation, ids: &[&str]) -> ServiceImplementation {
    ids.iter().fold(implementation, |i, id| {
        i.with_instance(Instance::new(*id, InstanceStatus::Active))
    })
}

/// The ordering application: ordering calls payment, delivery and the
/// restaurant. Delivery can switch to a better (b) or worse (c)
/// implementation.
fn store() -> InMemoryKnowledge {
    InMemoryKnowledge::with_services([
        service(
            ORDERING,
            &[PAYMENT, DELIVERY, RESTAURANT],
            vec![with_instances(implementation("ordering", 1.0, 0.95, 200.0, 10.0), &["o1"])],
            0.95,
            200.0,
        ),
        service(
            PAYMENT,
            &[],
            vec![with_instances(implementation("payment", 1.0, 0.9, 150.0, 5.0), &["p1"])],
            0.9,
            150.0,
        ),
        service(
            DELIVERY,
            &[],
            vec![
                with_instances(implementation("delivery-a", 0.4, 0.8, 300.0, 5.0), &["d1", "d2", "d3"]),
                implementation("delivery-b", 0.3, 0.99, 300.0, 5.0),
                implementation("delivery-c", 0.3, 0.5, 300.0, 5.0),
            ],
            0.8,
            300.0,
        ),
        service(
            RESTAURANT,
            &[],
            vec![with_instances(implementation("restaurant", 1.0, 0.99, 100.0, 2.0), &["r1"])],
            0.99,
            100.0,
        ),
    ])
    .unwrap()
}

fn planner(knowledge: Arc<dyn Knowledge>) -> (Planner, mpsc::Receiver<()>) {
    let (execute, rx) = ChannelExecute::channel();
    let planner = Planner::from_config(&PlanConfig::default(), knowledge, Arc::new(execute));
    (planner, rx)
}

fn switch_delivery(to: &str) -> AdaptationOption {
    AdaptationOption::change_implementation(
        DELIVERY,
        "delivery-a",
        vec![to.to_string()],
        QosKind::Availability,
    )
}

#[tokio::test]
async fn best_proposal_is_chosen_system_wide() {
    let store = store();
    store.propose_option(switch_delivery("delivery-c")).unwrap();
    store.propose_option(switch_delivery("delivery-b")).unwrap();
    let (mut planner, mut execute) = planner(Arc::new(store.clone()));

    let outcome = planner.run_iteration().await.unwrap();

    assert_eq!(planner.phase(), PlanPhase::Idle);
    let chosen = &outcome.chosen[DELIVERY];
    assert_eq!(chosen.len(), 1);
    assert!(matches!(
        &chosen[0].kind,
        OptionKind::ChangeImplementation { new_implementation_id: Some(id), .. } if id == "delivery-b"
    ));
    assert_eq!(outcome.invalidated, vec![DELIVERY.to_string(), ORDERING.to_string()]);
    assert_eq!(store.chosen_adaptation_options(), outcome.chosen);
    assert!(store.proposed_options().is_empty());
    assert_eq!(store.active_module(), Some(Module::Plan));
    assert!(execute.try_recv().is_ok());
}

#[tokio::test]
async fn nothing_is_chosen_when_no_proposal_beats_the_baseline() {
    let store = store();
    store.propose_option(switch_delivery("delivery-c")).unwrap();
    let (mut planner, mut execute) = planner(Arc::new(store.clone()));

    let outcome = planner.run_iteration().await.unwrap();

    assert!(outcome.chosen.is_empty());
    assert!(outcome.invalidated.is_empty());
    assert!(store.chosen_adaptation_options().is_empty());
    assert!(execute.try_recv().is_ok());
}

#[tokio::test]
async fn forced_options_preempt_proposals_and_combine() {
    let store = store();
    store.propose_option(switch_delivery("delivery-b")).unwrap();
    store
        .propose_option(AdaptationOption::add_instance(DELIVERY, "delivery-a").forced())
        .unwrap();
    store
        .propose_option(AdaptationOption::shutdown_instance(DELIVERY, "delivery-a", "d3").forced())
        .unwrap();
    let (mut planner, _execute) = planner(Arc::new(store.clone()));

    let outcome = planner.run_iteration().await.unwrap();

    let chosen = &outcome.chosen[DELIVERY];
    let kinds: Vec<&str> = chosen.iter().map(|o| o.kind.name()).collect();
    assert_eq!(kinds, vec!["ShutdownInstance", "AddInstance"]);

    let OptionKind::ShutdownInstance { new_weights: Some(after_shutdown), .. } = &chosen[0].kind else {
        panic!("shutdown not resolved");
    };
    assert_eq!(after_shutdown.len(), 2);
    assert!((after_shutdown["d1"] - 0.5).abs() < 1e-9);

    let weights = chosen[1].final_weights("d4").unwrap();
    assert_eq!(weights.len(), 3);
    assert!(!weights.contains_key("d3"));
    assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);

    // The planner works on a copy; Execute applies the shutdown.
    assert!(store.service(DELIVERY).unwrap().instance("d3").is_some());
}

#[tokio::test]
async fn two_forced_adds_abort_the_iteration() {
    let store = store();
    for _ in 0..2 {
        store
            .propose_option(AdaptationOption::add_instance(PAYMENT, "payment").forced())
            .unwrap();
    }
    store
        .propose_option(AdaptationOption::shutdown_instance(DELIVERY, "delivery-a", "d1").forced())
        .unwrap();
    let (mut planner, mut execute) = planner(Arc::new(store.clone()));

    let err = planner.run_iteration().await.unwrap_err();

    assert!(matches!(err, PlanError::MultipleForcedAddInstance { ref service_id } if service_id == PAYMENT));
    assert_eq!(planner.phase(), PlanPhase::Failed);
    assert_eq!(store.failed_module(), Some(Module::Plan));
    assert!(store.chosen_adaptation_options().is_empty());
    assert!(!store.proposed_options().is_empty());
    assert!(execute.try_recv().is_err());
}

#[tokio::test]
async fn unauthorized_adaptation_still_hands_over_to_execute() {
    let store = store();
    store.propose_option(switch_delivery("delivery-b")).unwrap();
    let (planner, mut execute) = planner(Arc::new(store.clone()));
    let mut planner = planner.with_adaptation_authorized(false);

    let outcome = planner.run_iteration().await.unwrap();

    assert!(!outcome.authorized);
    assert!(outcome.chosen.is_empty());
    assert!(store.chosen_adaptation_options().is_empty());
    assert_eq!(store.proposed_options()[DELIVERY].len(), 1);
    assert!(execute.try_recv().is_ok());
}

#[tokio::test]
async fn weight_change_without_metrics_is_skipped() {
    let store = store();
    store
        .propose_option(AdaptationOption::change_load_balancer_weights(RESTAURANT, "restaurant"))
        .unwrap();
    let (mut planner, _execute) = planner(Arc::new(store.clone()));

    let outcome = planner.run_iteration().await.unwrap();

    assert_eq!(outcome.skipped, vec![RESTAURANT.to_string()]);
    assert!(outcome.chosen.is_empty());
}

#[tokio::test]
async fn services_in_transition_are_invalidated() {
    let store = store();
    store.add_instance(PAYMENT, Instance::new("p2", InstanceStatus::Booting)).unwrap();
    store.record_service_value(PAYMENT, QosKind::Availability, 0.9).unwrap();
    store.record_service_value(ORDERING, QosKind::Availability, 0.95).unwrap();
    let (mut planner, _execute) = planner(Arc::new(store.clone()));

    let outcome = planner.run_iteration().await.unwrap();

    assert_eq!(outcome.invalidated, vec![PAYMENT.to_string(), ORDERING.to_string()]);
    let payment = store.service(PAYMENT).unwrap();
    assert!(payment.qos.latest(QosKind::Availability).is_none());
    // The current value slot survives invalidation.
    assert_eq!(payment.current_value(QosKind::Availability), Some(0.9));
}

/// Knowledge whose delivery service gains an instance right after the
/// planner takes its snapshot.
struct RacingKnowledge {
    inner: InMemoryKnowledge,
}

impl Knowledge for RacingKnowledge {
    fn services(&self) -> KnowledgeResult<BTreeMap<ServiceId, Service>> {
        let services = self.inner.services()?;
        self.inner
            .add_instance(DELIVERY, Instance::new("intruder", InstanceStatus::Booting))?;
        Ok(services)
    }

    fn proposed_adaptation_options(&self) -> KnowledgeResult<OptionsByService> {
        self.inner.proposed_adaptation_options()
    }

    fn choose_adaptation_options(&self, chosen: &ChosenOptions) -> KnowledgeResult<()> {
        self.inner.choose_adaptation_options(chosen)
    }

    fn invalidate_qos_history(&self, service_id: &str) -> KnowledgeResult<()> {
        self.inner.invalidate_qos_history(service_id)
    }

    fn notify_module_start(&self, module: Module) -> KnowledgeResult<()> {
        self.inner.notify_module_start(module)
    }

    fn set_failed_module(&self, module: Module) -> KnowledgeResult<()> {
        self.inner.set_failed_module(module)
    }
}

#[tokio::test]
async fn concurrent_modification_fails_loudly() {
    let store = store();
    store
        .propose_option(AdaptationOption::shutdown_instance(DELIVERY, "delivery-a", "d1").forced())
        .unwrap();
    let racing = RacingKnowledge { inner: store.clone() };
    let (mut planner, mut execute) = planner(Arc::new(racing));

    let err = planner.run_iteration().await.unwrap_err();

    assert!(matches!(
        err,
        PlanError::Knowledge(KnowledgeError::ConcurrentModification { .. })
    ));
    assert_eq!(store.failed_module(), Some(Module::Plan));
    assert!(store.chosen_adaptation_options().is_empty());
    assert!(execute.try_recv().is_err());
}

#[tokio::test]
async fn runner_plans_once_per_trigger() {
    let store = store();
    let (planner, mut execute) = planner(Arc::new(store.clone()));
    let mut runner = PlanRunner::new(planner);
    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    trigger_tx.send(()).await.unwrap();
    trigger_tx.send(()).await.unwrap();
    drop(trigger_tx);

    let iterations = runner.run(trigger_rx, shutdown_rx).await;
    assert_eq!(iterations, 2);
    assert_eq!(runner.planner().iterations(), 2);
    assert!(execute.try_recv().is_ok());
}

#[tokio::test]
async fn runner_stops_on_shutdown() {
    let store = store();
    let (planner, _execute) = planner(Arc::new(store));
    let mut runner = PlanRunner::new(planner);
    let (_trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move { runner.run(trigger_rx, shutdown_rx).await });
    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 0);
}

#[test]
fn scores_must_sum_to_one() {
    let err = Service::new(
        "svc",
        "a",
        vec![ServiceImplementation::new("a", 0.5), ServiceImplementation::new("b", 0.4)],
        Vec::<String>::new(),
    )
    .unwrap_err();
    assert!(matches!(err, KnowledgeError::ScoreSum { .. }));
}
