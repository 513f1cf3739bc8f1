//! The VM facade: deploy modules, run transactions.
//!
//! Owns the per-address deployed artifacts, object stores, and user
//! key-value stores. Each external transaction runs on a fresh task; the
//! nested call/create primitives re-enter through the same task so the
//! reentrant stack spans the whole invocation tree.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use sha2::{Digest, Sha256};

use crate::config::VmConfig;
use crate::error::VmError;
use crate::executor::context::{Address, TransactionContext};
use crate::executor::dapp::LoadedDApp;
use crate::executor::result::TransactionResult;
use crate::executor::user_store::UserStore;
use crate::executor::{self, EntryKind, TaskContext};
use crate::persistence::store::{GraphStore, InMemoryGraphStore};
use crate::transform::{self, RawModule};

pub struct DeployedDApp<S: GraphStore> {
    pub dapp: Arc<LoadedDApp>,
    pub store: S,
    pub user_kv: UserStore,
}

pub struct Avm<S: GraphStore = InMemoryGraphStore> {
    config: VmConfig,
    dapps: HashMap<Address, DeployedDApp<S>>,
    deploy_nonce: u64,
}

/// Outcome of a deployment: the address exists only when the class
/// initializers committed.
#[derive(Debug)]
pub struct DeployOutcome {
    pub address: Option<Address>,
    pub result: TransactionResult,
}

impl<S: GraphStore> Avm<S> {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            dapps: HashMap::new(),
            deploy_nonce: 0,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn deployed(&self, address: Address) -> Option<&DeployedDApp<S>> {
        self.dapps.get(&address)
    }

    pub fn deployed_mut(&mut self, address: Address) -> Option<&mut DeployedDApp<S>> {
        self.dapps.get_mut(&address)
    }

    /// Deterministic address assignment: nonce plus main class name.
    fn derive_address(&mut self, seed: &str) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(self.deploy_nonce.to_be_bytes());
        hasher.update(seed.as_bytes());
        self.deploy_nonce += 1;
        let digest = hasher.finalize();
        Address::from_slice(&digest).expect("sha256 output is address-sized")
    }
}

impl<S: GraphStore + Default> Avm<S> {
    /// Deploy an external module: transform, run class initializers under
    /// the energy budget, and persist the resulting statics. Transformation
    /// rejections surface as errors; initializer failures surface in the
    /// result with no address assigned.
    pub fn deploy(
        &mut self,
        module: &RawModule,
        deployer: Address,
        energy_limit: u64,
    ) -> Result<DeployOutcome, VmError> {
        // Surface transformation failures eagerly for external callers.
        transform::transform_module(module, &self.config)?;
        let mut task = TaskContext::new();
        let (address, result) = self.deploy_in_task(
            &mut task,
            module,
            deployer,
            deployer,
            0,
            energy_limit,
            0,
            (0, 0, 0),
        );
        Ok(DeployOutcome { address, result })
    }

    /// Deployment on an existing task; also the backend of the bridge's
    /// `create` primitive. Transformation failures become failed results
    /// here, since nested creators only observe success and an address.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn deploy_in_task(
        &mut self,
        task: &mut TaskContext,
        module: &RawModule,
        sender: Address,
        origin: Address,
        value: u64,
        energy_limit: u64,
        depth: u16,
        block: (u64, u64, u64),
    ) -> (Option<Address>, TransactionResult) {
        let failed = |energy_used| TransactionResult {
            status: crate::executor::result::TransactionStatus::Failed,
            return_data: None,
            energy_used,
            storage_root_hash: None,
            uncaught_message: None,
            logs: Vec::new(),
        };

        let artifact = match transform::transform_module(module, &self.config) {
            Ok(artifact) => artifact,
            Err(_) => return (None, failed(energy_limit)),
        };
        let loaded = match LoadedDApp::load(&artifact) {
            Ok(loaded) => loaded,
            Err(_) => return (None, failed(energy_limit)),
        };

        let address = self.derive_address(&module.main_class);
        if self.dapps.contains_key(&address) {
            return (None, failed(energy_limit));
        }
        self.dapps.insert(
            address,
            DeployedDApp {
                dapp: Arc::new(loaded),
                store: S::default(),
                user_kv: UserStore::new(),
            },
        );

        let (block_number, block_epoch_seconds, block_difficulty) = block;
        let ctx = TransactionContext {
            address,
            sender,
            origin,
            value,
            data: Vec::new(),
            energy_limit,
            block_number,
            block_epoch_seconds,
            block_difficulty,
            depth,
        };
        let result = executor::execute(self, task, &ctx, EntryKind::Deployment);
        if result.is_success() {
            info!("deployed {} ({} classes)", address, module.classes.len());
            (Some(address), result)
        } else {
            // A failed deployment leaves no trace.
            self.dapps.remove(&address);
            (None, result)
        }
    }

    /// Run one external transaction on a fresh task.
    pub fn run(&mut self, ctx: &TransactionContext) -> TransactionResult {
        let mut task = TaskContext::new();
        executor::execute_call(self, &mut task, ctx)
    }
}

impl Avm<InMemoryGraphStore> {
    /// An in-memory VM with default limits; the usual test entry.
    pub fn in_memory() -> Self {
        Self::new(VmConfig::default())
    }
}
