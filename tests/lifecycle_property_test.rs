//! Property-based checks that arbitrary command sequences for one workload
//! never leave container existence and reported state disagreeing, and that
//! the reported state always walks a valid path through the state machine.

use fogline::config::AgentConfig;
use fogline::context::AgentContext;
use fogline::domain::{ContainerTask, ImageRef, Registry, RegistryId, TaskAction, Workload, WorkloadId, WorkloadState};
use proptest::prelude::*;

// Grounded directly on `lifecycle_engine.rs`'s `set_workload_state` call
// sites: every public command (ADD/UPDATE/REMOVE/STOP) decides its own state
// sequence from the runtime's and registry's current facts, not from the
// previously *reported* state, so PULLING/STOPPING/DELETING/STOPPED are each
// reachable from any prior state. STARTING only ever follows PULLING, and
// RUNNING/UNKNOWN only ever follow STARTING.
fn valid_transition(from: Option<WorkloadState>, to: WorkloadState) -> bool {
    use WorkloadState::{Pulling, Running, Starting, Stopped, Stopping, Unknown, Deleting, Failed};
    match (from, to) {
        (None, _) => true,
        (Some(a), b) if a == b => true,
        (_, Pulling | Stopping | Deleting | Stopped) => true,
        (Some(Pulling), Starting | Failed) => true,
        (Some(Starting), Running | Unknown | Failed) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Add,
    Update,
    Remove,
    RemoveWithCleanUp,
    Stop,
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Add),
        Just(Command::Update),
        Just(Command::Remove),
        Just(Command::RemoveWithCleanUp),
        Just(Command::Stop),
    ]
}

fn command_action(command: Command) -> TaskAction {
    match command {
        Command::Add => TaskAction::Add,
        Command::Update => TaskAction::Update,
        Command::Remove => TaskAction::Remove,
        Command::RemoveWithCleanUp => TaskAction::RemoveWithCleanUp,
        Command::Stop => TaskAction::Stop,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn command_sequences_keep_container_existence_and_state_consistent(
        commands in prop::collection::vec(arb_command(), 1..12),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (transitions, container_exists, last_command) = rt.block_on(async move {
            let dir = tempfile::tempdir().unwrap();
            let mut config = AgentConfig::default();
            config.database_path = dir.path().join("fogline.db");
            let context = AgentContext::new(config).await.unwrap();

            let uuid = WorkloadId::generate();
            context.registry.replace_latest(vec![Workload::new(
                uuid,
                ImageRef::try_new("img:1").unwrap(),
                RegistryId(1),
                false,
            )]);
            context.registry.replace_registries(vec![Registry {
                id: RegistryId(1),
                url: "quay.example/team".to_string(),
                credentials: None,
                tls_cert: None,
                dev_mode_enabled: false,
            }]);

            let mut transitions = Vec::new();
            let mut previous_state = None;
            let mut last_command = None;
            for command in commands {
                let action = command_action(command);
                let result = context
                    .lifecycle
                    .execute(ContainerTask::new(action, uuid))
                    .await;

                if let Some(state) = context.status.workload_state(uuid) {
                    transitions.push((previous_state, state));
                    previous_state = Some(state);
                }
                if result.is_ok() {
                    last_command = Some(command);
                }
            }

            let container_exists = context
                .registry
                .current_snapshot()
                .iter()
                .any(|w| w.uuid == uuid && w.container_id.is_some());

            (transitions, container_exists, last_command)
        });

        for (from, to) in transitions {
            prop_assert!(valid_transition(from, to));
        }

        match last_command {
            Some(Command::Remove | Command::RemoveWithCleanUp) => {
                prop_assert!(!container_exists);
            }
            Some(Command::Add | Command::Update) => {
                prop_assert!(container_exists);
            }
            _ => {}
        }
    }
}
