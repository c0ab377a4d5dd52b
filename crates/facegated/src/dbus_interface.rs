use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::error::PipelineError;
use crate::orchestrator::PipelineHandle;
use crate::store::TemplateStore;

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub pipeline: PipelineHandle,
    pub store: TemplateStore,
}

/// D-Bus interface for the facegate pipeline daemon.
///
/// Bus name: org.facegate.Pipeline1
/// Object path: /org/facegate/Pipeline1
pub struct PipelineService {
    pub state: Arc<Mutex<AppState>>,
}

/// Retrieve the UID of the D-Bus peer identified by `sender_str` (a unique
/// bus name).
async fn get_caller_uid(sender_str: &str, conn: &zbus::Connection) -> zbus::fdo::Result<u32> {
    let dbus_proxy = zbus::fdo::DBusProxy::new(conn)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    let bus_name = zbus::names::BusName::try_from(sender_str)
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    dbus_proxy
        .get_connection_unix_user(bus_name)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Look up the numeric UID for a local username by parsing `/etc/passwd`.
fn uid_for_name(name: &str) -> Option<u32> {
    let contents = std::fs::read_to_string("/etc/passwd").ok()?;
    for line in contents.lines() {
        let mut parts = line.split(':');
        let uname = parts.next()?;
        if uname != name {
            continue;
        }
        parts.next(); // password field
        let uid_str = parts.next()?;
        return uid_str.parse().ok();
    }
    None
}

fn to_fdo(e: PipelineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.facegate.Pipeline1")]
impl PipelineService {
    /// Enroll a new template for the given user.
    ///
    /// Returns the UUID of the stored template.
    async fn enroll(&self, user: &str, label: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user, label, "enroll requested");

        // Copy handle while holding the lock, then release it for the run
        let pipeline = self.state.lock().await.pipeline.clone();

        let template = pipeline.enroll(None).await.map_err(|e| {
            tracing::error!(error = %e, "enroll failed");
            to_fdo(e)
        })?;

        tracing::info!(
            quality = template.avg_quality,
            samples = template.sample_count,
            "enroll: template built"
        );

        let state = self.state.lock().await;
        let template_id = state
            .store
            .insert(user, label, &template)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "enroll: store insert failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::info!(template_id = %template_id, user, label, "enrolled successfully");
        Ok(template_id)
    }

    /// Verify the current face against the user's enrolled templates.
    ///
    /// Returns true if any template is accepted.
    ///
    /// On the system bus the caller UID is validated against the target
    /// username before any camera work. Root (UID 0) is always permitted.
    /// On the session bus (development mode) UID validation is skipped.
    async fn verify(
        &self,
        user: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<bool> {
        tracing::info!(user, "verify requested");

        let session_bus = self.state.lock().await.config.session_bus;
        if !session_bus {
            let sender = header
                .sender()
                .ok_or_else(|| zbus::fdo::Error::Failed("no sender in message".to_string()))?;
            let caller_uid = get_caller_uid(sender.as_str(), conn).await?;
            if caller_uid != 0 {
                match uid_for_name(user) {
                    Some(expected_uid) if caller_uid == expected_uid => {}
                    Some(_) => {
                        tracing::warn!(user, caller_uid, "verify: caller UID mismatch");
                        return Err(zbus::fdo::Error::AccessDenied(format!(
                            "caller is not permitted to verify user '{user}'"
                        )));
                    }
                    None => {
                        tracing::warn!(user, "verify: unknown user");
                        return Err(zbus::fdo::Error::Failed(format!("unknown user '{user}'")));
                    }
                }
            }
        }

        // Fetch gallery and handle, then release the lock for the run
        let (pipeline, gallery) = {
            let state = self.state.lock().await;
            let gallery = state.store.get_for_user(user).await.map_err(|e| {
                tracing::error!(error = %e, "verify: gallery fetch failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;
            (state.pipeline.clone(), gallery)
        };

        if gallery.is_empty() {
            tracing::warn!(user, "verify: no enrolled templates");
            return Err(zbus::fdo::Error::Failed(format!(
                "no enrolled templates for user '{user}'"
            )));
        }

        // Newest templates first; stop at the first accepted match. Each
        // attempt is a full pipeline run, so rejections are expensive, but
        // users rarely hold more than a handful of templates.
        for stored in gallery.into_iter().rev() {
            match pipeline.verify(stored.template, None).await {
                Ok(result) => {
                    tracing::info!(
                        user,
                        template_id = %stored.id,
                        similarity = result.similarity,
                        confidence = result.confidence,
                        "verify: accepted"
                    );
                    return Ok(true);
                }
                Err(e @ PipelineError::VerificationRejected { .. }) => {
                    tracing::info!(user, template_id = %stored.id, error = %e, "verify: rejected");
                }
                Err(e) => {
                    tracing::error!(error = %e, "verify failed");
                    return Err(to_fdo(e));
                }
            }
        }

        tracing::info!(user, "verify: no template accepted");
        Ok(false)
    }

    /// Cancel the pipeline run in flight, if any.
    async fn cancel(&self) -> zbus::fdo::Result<()> {
        tracing::info!("cancel requested");
        self.state.lock().await.pipeline.cancel();
        Ok(())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.state.lock().await;
        let template_count = state.store.count_all().await.unwrap_or(0);
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "pipeline_state": state.pipeline.state(),
            "templates": template_count,
            "synthetic_source": state.config.synthetic_source,
        })
        .to_string())
    }

    /// List enrolled templates for the given user (metadata only).
    async fn list_templates(&self, user: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user, "list_templates requested");
        let state = self.state.lock().await;
        let infos = state
            .store
            .list_by_user(user)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&infos).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove an enrolled template by ID.
    async fn remove_template(&self, user: &str, template_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(user, template_id, "remove_template requested");
        let state = self.state.lock().await;
        state
            .store
            .remove(user, template_id)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
