use crate::{
    id::GuildId,
    session::{GuildSession, SessionContext, SessionHandle},
};
use futures::future::join_all;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Hands out the session of each guild, starting it on first use.
#[derive(Clone)]
pub struct SessionRegistry {
    ctx: SessionContext,
    sessions: Arc<RwLock<HashMap<GuildId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        SessionRegistry {
            ctx,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Returns the session of `guild_id`, spawning a new one if the guild has
    /// none or its previous task has exited.
    pub async fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        if let Some(handle) = self.get(guild_id).await {
            return handle;
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(&guild_id) {
            // Someone else got here first
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => {
                debug!("Starting session for guild {}", guild_id);
                let handle = GuildSession::spawn(guild_id, self.ctx.clone());
                sessions.insert(guild_id, handle.clone());
                handle
            }
        }
    }

    /// Returns the live session of `guild_id`, if any.
    pub async fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&guild_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    pub async fn guilds(&self) -> Vec<GuildId> {
        let sessions = self.sessions.read().await;
        let mut guilds: Vec<_> = sessions.keys().copied().collect();
        guilds.sort();
        guilds
    }

    /// Makes every session leave its channel and stops all session tasks.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();

        join_all(sessions.into_iter().map(|(guild_id, handle)| async move {
            if let Err(e) = handle.leave().await {
                debug!("Session for guild {} already gone: {}", guild_id, e);
            }
        }))
        .await;
    }
}
