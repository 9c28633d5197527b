use std::sync::Arc;

use anyhow::{bail, Result};

use crate::{
    config::Config,
    core::{
        direct_post_jwt::{DirectPostJwtEncryptionService, EncryptionKeyRepository},
        seed::{SeedSequence, UuidSeedSequence},
        telemetry::{Clock, SystemClock, TelemetryPublisher, TracingTelemetry},
        trust::TrustedAuthorityEvaluator,
    },
    memory::MemoryStore,
    verifier::{
        AuthorizationRequestService, DcqlPresetRepository, StoredPresentationRepository,
        ValidationService,
    },
    wallet::{
        DeviceResponsePresetRepository, MdocWalletSimulationService, WalletPresetRepository,
        WalletSimulationService,
    },
};

/// Every simulator service, wired to one set of collaborators.
#[derive(Debug, Clone)]
pub struct Simulator {
    requests: AuthorizationRequestService,
    sd_jwt_wallet: WalletSimulationService,
    mdoc_wallet: MdocWalletSimulationService,
    encryption: DirectPostJwtEncryptionService,
    validation: ValidationService,
}

impl Simulator {
    pub fn builder() -> SimulatorBuilder {
        SimulatorBuilder::default()
    }

    pub fn requests(&self) -> &AuthorizationRequestService {
        &self.requests
    }

    pub fn sd_jwt_wallet(&self) -> &WalletSimulationService {
        &self.sd_jwt_wallet
    }

    pub fn mdoc_wallet(&self) -> &MdocWalletSimulationService {
        &self.mdoc_wallet
    }

    pub fn encryption(&self) -> &DirectPostJwtEncryptionService {
        &self.encryption
    }

    pub fn validation(&self) -> &ValidationService {
        &self.validation
    }
}

/// Builder struct for [Simulator].
///
/// Seeds default to random UUIDs, telemetry to `tracing` events and the
/// clock to the system clock.
#[derive(Debug, Clone, Default)]
pub struct SimulatorBuilder {
    config: Option<Config>,
    dcql_presets: Option<Arc<dyn DcqlPresetRepository + Send + Sync>>,
    wallet_presets: Option<Arc<dyn WalletPresetRepository + Send + Sync>>,
    device_responses: Option<Arc<dyn DeviceResponsePresetRepository + Send + Sync>>,
    presentations: Option<Arc<dyn StoredPresentationRepository + Send + Sync>>,
    keys: Option<Arc<dyn EncryptionKeyRepository + Send + Sync>>,
    seeds: Option<Arc<dyn SeedSequence + Send + Sync>>,
    telemetry: Option<Arc<dyn TelemetryPublisher + Send + Sync>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl SimulatorBuilder {
    /// Build the simulator.
    pub fn build(self) -> Result<Simulator> {
        let Self {
            config,
            dcql_presets,
            wallet_presets,
            device_responses,
            presentations,
            keys,
            seeds,
            telemetry,
            clock,
        } = self;

        let Some(dcql_presets) = dcql_presets else {
            bail!("DCQL preset repository is required, see `with_dcql_presets`")
        };
        let Some(wallet_presets) = wallet_presets else {
            bail!("wallet preset repository is required, see `with_wallet_presets`")
        };
        let Some(device_responses) = device_responses else {
            bail!("device response repository is required, see `with_device_responses`")
        };
        let Some(presentations) = presentations else {
            bail!("stored presentation repository is required, see `with_presentations`")
        };
        let Some(keys) = keys else {
            bail!("encryption key repository is required, see `with_encryption_keys`")
        };

        let config = Arc::new(config.unwrap_or_default());
        let seeds = seeds.unwrap_or_else(|| Arc::new(UuidSeedSequence));
        let telemetry = telemetry.unwrap_or_else(|| Arc::new(TracingTelemetry));
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));

        let encryption = DirectPostJwtEncryptionService::new(keys, clock, telemetry.clone());
        let evaluator = Arc::new(TrustedAuthorityEvaluator::new(&config.trust_snapshot));

        Ok(Simulator {
            requests: AuthorizationRequestService::new(
                config.clone(),
                dcql_presets,
                seeds,
                telemetry.clone(),
            ),
            sd_jwt_wallet: WalletSimulationService::new(
                wallet_presets,
                Arc::new(encryption.clone()),
                telemetry.clone(),
            ),
            mdoc_wallet: MdocWalletSimulationService::new(
                device_responses,
                evaluator,
                Arc::new(encryption.clone()),
                telemetry.clone(),
            ),
            validation: ValidationService::new(
                config,
                presentations,
                encryption.clone(),
                telemetry,
            ),
            encryption,
        })
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use one [MemoryStore] for every repository.
    pub fn with_memory_store(self, store: Arc<MemoryStore>) -> Self {
        self.with_dcql_presets(store.clone())
            .with_wallet_presets(store.clone())
            .with_device_responses(store.clone())
            .with_presentations(store.clone())
            .with_encryption_keys(store)
    }

    pub fn with_dcql_presets(mut self, presets: Arc<dyn DcqlPresetRepository + Send + Sync>) -> Self {
        self.dcql_presets = Some(presets);
        self
    }

    pub fn with_wallet_presets(
        mut self,
        presets: Arc<dyn WalletPresetRepository + Send + Sync>,
    ) -> Self {
        self.wallet_presets = Some(presets);
        self
    }

    pub fn with_device_responses(
        mut self,
        presets: Arc<dyn DeviceResponsePresetRepository + Send + Sync>,
    ) -> Self {
        self.device_responses = Some(presets);
        self
    }

    pub fn with_presentations(
        mut self,
        presentations: Arc<dyn StoredPresentationRepository + Send + Sync>,
    ) -> Self {
        self.presentations = Some(presentations);
        self
    }

    pub fn with_encryption_keys(
        mut self,
        keys: Arc<dyn EncryptionKeyRepository + Send + Sync>,
    ) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_seed_sequence(mut self, seeds: Arc<dyn SeedSequence + Send + Sync>) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryPublisher + Send + Sync>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}
