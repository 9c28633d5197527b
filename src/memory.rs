//! In-memory implementations of every repository the services consume.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Result};

use crate::{
    core::{
        direct_post_jwt::{EncryptionKeyMaterial, EncryptionKeyRepository},
        profile::Profile,
    },
    verifier::{DcqlPreset, DcqlPresetRepository, StoredPresentation, StoredPresentationRepository},
    wallet::{
        DeviceResponsePreset, DeviceResponsePresetRepository, WalletPreset,
        WalletPresetRepository,
    },
};

#[derive(Debug, Default)]
struct Tables {
    dcql_presets: BTreeMap<String, DcqlPreset>,
    wallet_presets: BTreeMap<String, WalletPreset>,
    device_responses: BTreeMap<String, DeviceResponsePreset>,
    presentations: BTreeMap<String, StoredPresentation>,
    keys: BTreeMap<Profile, EncryptionKeyMaterial>,
}

/// A process-local store, mainly for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn insert_dcql_preset(&self, preset: DcqlPreset) -> Result<()> {
        self.tables()?
            .dcql_presets
            .insert(preset.preset_id.clone(), preset);
        Ok(())
    }

    pub fn insert_wallet_preset(&self, preset: WalletPreset) -> Result<()> {
        self.tables()?
            .wallet_presets
            .insert(preset.preset_id.clone(), preset);
        Ok(())
    }

    pub fn insert_device_response_preset(&self, preset: DeviceResponsePreset) -> Result<()> {
        self.tables()?
            .device_responses
            .insert(preset.preset_id.clone(), preset);
        Ok(())
    }

    pub fn insert_presentation(&self, presentation: StoredPresentation) -> Result<()> {
        self.tables()?
            .presentations
            .insert(presentation.presentation_id.clone(), presentation);
        Ok(())
    }

    pub fn insert_encryption_key(&self, profile: Profile, key: EncryptionKeyMaterial) -> Result<()> {
        self.tables()?.keys.insert(profile, key);
        Ok(())
    }

    pub fn remove_encryption_key(&self, profile: Profile) -> Result<()> {
        if self.tables()?.keys.remove(&profile).is_some() {
            return Ok(());
        }
        bail!("no encryption key for {profile}")
    }
}

impl DcqlPresetRepository for MemoryStore {
    fn load(&self, preset_id: &str) -> Result<Option<DcqlPreset>> {
        Ok(self.tables()?.dcql_presets.get(preset_id).cloned())
    }
}

impl WalletPresetRepository for MemoryStore {
    fn load(&self, preset_id: &str) -> Result<Option<WalletPreset>> {
        Ok(self.tables()?.wallet_presets.get(preset_id).cloned())
    }
}

impl DeviceResponsePresetRepository for MemoryStore {
    fn load(&self, preset_id: &str) -> Result<Option<DeviceResponsePreset>> {
        Ok(self.tables()?.device_responses.get(preset_id).cloned())
    }
}

impl StoredPresentationRepository for MemoryStore {
    fn load(&self, presentation_id: &str) -> Result<Option<StoredPresentation>> {
        Ok(self.tables()?.presentations.get(presentation_id).cloned())
    }
}

impl EncryptionKeyRepository for MemoryStore {
    fn load(&self, profile: Profile) -> Result<EncryptionKeyMaterial> {
        match self.tables()?.keys.get(&profile) {
            Some(key) => Ok(key.clone()),
            None => bail!("no encryption key configured for {profile}"),
        }
    }
}
