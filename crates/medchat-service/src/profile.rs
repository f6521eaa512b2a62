//! Preferences, profile and guest transfer.

use tracing::info;

use medchat_chat::{is_supported, ChatError};
use medchat_storage::TransferSummary;
use medchat_types::{UserPreferenceProfile, UserProfile};

use crate::error::ServiceError;
use crate::service::ChatService;

impl ChatService {
    /// Stored preferences, or None if the user never saved any.
    pub async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPreferenceProfile>, ServiceError> {
        Ok(self.store.get_preferences(user_id).await?)
    }

    /// Merge `update` into the stored preferences.
    ///
    /// A user without stored preferences starts from the stored defaults.
    pub async fn upsert_preferences(
        &self,
        user_id: &str,
        update: &UserPreferenceProfile,
    ) -> Result<UserPreferenceProfile, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::invalid("user_id must not be empty"));
        }
        if let Some(model) = update.preferred_model.as_deref() {
            if !is_supported(model) {
                return Err(ChatError::UnknownModel(model.to_string()).into());
            }
        }

        let mut preferences = self
            .store
            .get_preferences(user_id)
            .await?
            .unwrap_or_else(UserPreferenceProfile::stored_defaults);
        preferences.merge(update);

        self.store
            .put_preferences(user_id, preferences.clone())
            .await?;
        Ok(preferences)
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, ServiceError> {
        Ok(self.store.get_profile(user_id).await?)
    }

    /// Merge name, location and bio into the stored profile.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: &UserProfile,
    ) -> Result<UserProfile, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::invalid("user_id must not be empty"));
        }
        let mut profile = self.store.get_profile(user_id).await?.unwrap_or_default();
        profile.merge(update);
        self.store.put_profile(user_id, profile.clone()).await?;
        Ok(profile)
    }

    /// Move a guest's data to a registered account.
    pub async fn transfer_guest_data(
        &self,
        guest_id: &str,
        user_id: &str,
    ) -> Result<TransferSummary, ServiceError> {
        if guest_id.trim().is_empty() || user_id.trim().is_empty() {
            return Err(ServiceError::invalid("guest_id and user_id are required"));
        }
        if guest_id == user_id {
            return Err(ServiceError::invalid("guest_id and user_id must differ"));
        }
        let summary = self.store.transfer_guest_data(guest_id, user_id).await?;
        info!(
            conversations = summary.conversations,
            memories = summary.memories,
            "Guest data transferred"
        );
        Ok(summary)
    }
}
