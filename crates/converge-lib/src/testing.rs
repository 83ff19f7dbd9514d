//! In-memory doubles for the host, runtime and admin channel

use crate::admin::AdminChannel;
use crate::error::{AdminError, RuntimeError};
use crate::installer::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{InstanceStatus, ResourcePlan, RestartPolicy, ServiceInstance, ServiceSpec};
use crate::planner::{GIB, MIB};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

pub fn sample_spec(name: &str) -> ServiceSpec {
    let mut environment = BTreeMap::new();
    environment.insert("POSTGRES_PASSWORD".to_string(), "s3cr3t-pw".to_string());
    environment.insert("ACCESS_TOKEN".to_string(), "tok-abc-123".to_string());
    ServiceSpec {
        name: name.to_string(),
        image_reference: "postgres:16".to_string(),
        published_port: 5432,
        container_port: 5432,
        volume_host_path: PathBuf::from("/srv/converge/data"),
        volume_container_path: "/var/lib/postgresql/data".to_string(),
        environment,
        restart_policy: RestartPolicy::UnlessStopped,
        required_credentials: vec!["POSTGRES_PASSWORD".to_string(), "ACCESS_TOKEN".to_string()],
        admin_user: "postgres".to_string(),
    }
}

pub fn sample_plan() -> ResourcePlan {
    ResourcePlan {
        container_memory_limit_bytes: 12 * GIB,
        buffer_cache_bytes: 4 * GIB,
        effective_cache_bytes: 12 * GIB,
        work_mem_bytes: 16 * MIB,
        maintenance_work_mem_bytes: GIB,
        max_connections: 200,
        max_parallel_workers: 4,
    }
}

pub fn running(name: &str) -> ServiceInstance {
    ServiceInstance {
        instance_id: format!("{}-id", name),
        name: name.to_string(),
        status: InstanceStatus::Running,
    }
}

struct Rule {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Command runner answering by prefix; unmatched commands succeed
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    envs: Mutex<Vec<BTreeMap<String, String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command starting with `prefix` returns `output`.
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        self.push(prefix, output, false)
    }

    /// The next command starting with `prefix` returns `output`.
    pub fn respond_once(self, prefix: &str, output: CommandOutput) -> Self {
        self.push(prefix, output, true)
    }

    fn push(self, prefix: &str, output: CommandOutput, once: bool) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            output,
            once,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Environments passed to commands that carried one.
    pub fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.envs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> CommandOutput {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());
        if !command.env.is_empty() {
            self.envs.lock().unwrap().push(command.env.clone());
        }

        let mut rules = self.rules.lock().unwrap();
        match rules.iter().position(|r| line.starts_with(&r.prefix)) {
            Some(index) if rules[index].once => rules.remove(index).output,
            Some(index) => rules[index].output.clone(),
            None => CommandOutput::ok(""),
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    containers: Vec<ServiceInstance>,
    next_id: u32,
    calls: Vec<String>,
    statuses_after_create: VecDeque<InstanceStatus>,
    failing: HashSet<String>,
    vanished: HashSet<String>,
}

/// In-memory container runtime
///
/// Created containers report the queued statuses on successive inspects,
/// then stay at the last one (default `Running`).
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    logs: String,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(self, name: &str, status: InstanceStatus) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("old-{}", state.next_id);
            state.containers.push(ServiceInstance {
                instance_id: id,
                name: name.to_string(),
                status,
            });
        }
        self
    }

    pub fn with_statuses(self, statuses: &[InstanceStatus]) -> Self {
        self.state.lock().unwrap().statuses_after_create = statuses.iter().copied().collect();
        self
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = logs.to_string();
        self
    }

    /// Make an operation (`pull`, `create`, `stop`, ...) fail with exit code 125.
    pub fn failing(self, op: &str) -> Self {
        self.state.lock().unwrap().failing.insert(op.to_string());
        self
    }

    /// Make an operation report that its target no longer exists.
    pub fn vanished(self, op: &str) -> Self {
        self.state.lock().unwrap().vanished.insert(op.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change runtime state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["pull", "create", "stop", "remove", "restart"]
                    .iter()
                    .any(|op| c.starts_with(op))
            })
            .collect()
    }

    pub fn containers(&self) -> Vec<ServiceInstance> {
        self.state.lock().unwrap().containers.clone()
    }

    fn record(&self, op: &str, arg: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", op, arg));
        if state.failing.contains(op) {
            return Err(RuntimeError::new(op, Some(125), format!("{} refused", op)));
        }
        if state.vanished.contains(op) {
            return Err(RuntimeError::new(
                op,
                Some(1),
                format!("Error response from daemon: No such container: {}", arg),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl crate::runtime::ContainerRuntime for FakeRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.record("pull", image)
    }

    async fn create_and_start(
        &self,
        spec: &ServiceSpec,
        _plan: &ResourcePlan,
    ) -> Result<String, RuntimeError> {
        self.record("create", &spec.name)?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("new-{}", state.next_id);
        let status = state
            .statuses_after_create
            .front()
            .copied()
            .unwrap_or(InstanceStatus::Running);
        state.containers.push(ServiceInstance {
            instance_id: id.clone(),
            name: spec.name.clone(),
            status,
        });
        Ok(id)
    }

    async fn stop(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        self.record("stop", id_or_name)?;
        let mut state = self.state.lock().unwrap();
        for c in state
            .containers
            .iter_mut()
            .filter(|c| c.instance_id == id_or_name || c.name == id_or_name)
        {
            c.status = InstanceStatus::Exited;
        }
        Ok(())
    }

    async fn remove(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        self.record("remove", id_or_name)?;
        self.state
            .lock()
            .unwrap()
            .containers
            .retain(|c| c.instance_id != id_or_name && c.name != id_or_name);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ServiceInstance, RuntimeError> {
        self.record("inspect", name)?;
        let mut state = self.state.lock().unwrap();
        let next = state.statuses_after_create.front().copied();
        if state.statuses_after_create.len() > 1 {
            state.statuses_after_create.pop_front();
        }
        match state.containers.iter_mut().find(|c| c.name == name) {
            Some(container) => {
                if let Some(status) = next {
                    if container.instance_id.starts_with("new-") {
                        container.status = status;
                    }
                }
                Ok(container.clone())
            }
            None => Ok(ServiceInstance {
                instance_id: String::new(),
                name: name.to_string(),
                status: InstanceStatus::Absent,
            }),
        }
    }

    async fn logs(&self, name: &str, _tail: usize) -> Result<String, RuntimeError> {
        self.record("logs", name)?;
        Ok(self.logs.clone())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<ServiceInstance>, RuntimeError> {
        self.record("list", name)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect())
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.record("restart", name)?;
        let mut state = self.state.lock().unwrap();
        let first = state.statuses_after_create.front().copied();
        for c in state.containers.iter_mut().filter(|c| c.name == name) {
            c.status = first.unwrap_or(InstanceStatus::Running);
        }
        Ok(())
    }
}

/// Admin channel rejecting configured keys
#[derive(Default)]
pub struct FakeAdmin {
    rejected_keys: HashSet<String>,
    reload_fails: bool,
    live_after: u32,
    statements: Mutex<Vec<String>>,
    reloads: Mutex<u32>,
    probes: Mutex<u32>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, key: &str) -> Self {
        self.rejected_keys.insert(key.to_string());
        self
    }

    pub fn with_failing_reload(mut self) -> Self {
        self.reload_fails = true;
        self
    }

    /// Liveness succeeds from probe number `n` on (1-based); 0 means never.
    pub fn live_after(mut self, n: u32) -> Self {
        self.live_after = n;
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn reloads(&self) -> u32 {
        *self.reloads.lock().unwrap()
    }

    pub fn probes(&self) -> u32 {
        *self.probes.lock().unwrap()
    }
}

#[async_trait]
impl AdminChannel for FakeAdmin {
    async fn execute(
        &self,
        _instance: &ServiceInstance,
        statement: &str,
    ) -> Result<String, AdminError> {
        self.statements.lock().unwrap().push(statement.to_string());
        let rejected = self
            .rejected_keys
            .iter()
            .any(|k| statement.contains(&format!("SET {} =", k)));
        if rejected {
            return Err(AdminError::new(Some(1), "ERROR: invalid value for parameter"));
        }
        Ok(String::new())
    }

    async fn reload(&self, _instance: &ServiceInstance) -> Result<(), AdminError> {
        *self.reloads.lock().unwrap() += 1;
        if self.reload_fails {
            return Err(AdminError::new(Some(2), "server closed the connection"));
        }
        Ok(())
    }

    async fn liveness(&self, _instance: &ServiceInstance) -> Result<(), AdminError> {
        let mut probes = self.probes.lock().unwrap();
        *probes += 1;
        if self.live_after > 0 && *probes >= self.live_after {
            Ok(())
        } else {
            Err(AdminError::new(Some(2), "no response"))
        }
    }
}
