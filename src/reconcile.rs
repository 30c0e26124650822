//! Create-or-recover reconciliation and server lifecycle operations.
//!
//! Cloud name tags are not unique by construction, so reconciliation never
//! guesses: a running namesake rejects the request outright, and several
//! recoverable namesakes make the restart target undecidable. Terminal
//! instances are invisible to every decision.

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::connection::{CloudConnection, Instance, InstanceSpec, StateBucket};
use crate::server::{Credential, ManagedServer};
use crate::wait::{WaitError, WaitPolicy, wait_until};

/// Errors raised while reconciling or operating on server lifecycles.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// Indicates a request argument failed validation before any provider
    /// call.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Raised when one or more same-named instances are already running.
    #[error("server '{name}' already running in state(s): {states:?}")]
    DuplicateResource {
        /// Logical server name.
        name: String,
        /// Raw states of the running namesakes.
        states: Vec<String>,
    },
    /// Raised when several recoverable namesakes make the restart target
    /// undecidable.
    #[error("found {count} stopped servers named '{name}'; restart target is undecidable")]
    AmbiguousResource {
        /// Logical server name.
        name: String,
        /// Number of recoverable namesakes.
        count: usize,
    },
    /// Raised when no non-terminal instance matches a lookup.
    #[error("no server found with name '{name}'")]
    NotFound {
        /// Logical server name.
        name: String,
    },
    /// Raised when an instance disappears from the provider mid-wait.
    #[error("instance {instance_id} disappeared while waiting for it")]
    Vanished {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a ready instance exposes no usable address.
    #[error("instance {instance_id} reported ready but exposes no usable address")]
    MissingAddress {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a state wait exhausted its check budget.
    #[error("timed out waiting for {action} after {attempts} checks")]
    Timeout {
        /// Transition being waited on.
        action: &'static str,
        /// Checks performed before giving up.
        attempts: u32,
    },
    /// Raised when the caller's cancellation token fired.
    #[error("provisioning cancelled")]
    Cancelled,
    /// Provider-level failure.
    #[error("provider error")]
    Provider(#[source] E),
}

fn from_wait<E>(err: WaitError<E>, action: &'static str) -> ProvisionError<E>
where
    E: std::error::Error,
{
    match err {
        WaitError::Timeout { attempts } => ProvisionError::Timeout { action, attempts },
        WaitError::Cancelled => ProvisionError::Cancelled,
        WaitError::Provider(source) => ProvisionError::Provider(source),
    }
}

fn validated_name<E>(name: &str) -> Result<&str, ProvisionError<E>>
where
    E: std::error::Error,
{
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::Validation(String::from(
            "server name must not be empty",
        )));
    }
    Ok(trimmed)
}

/// Lists the non-terminal instances carrying `name`.
async fn live_instances<C>(conn: &C, name: &str) -> Result<Vec<Instance>, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    let all = conn
        .find_by_name(name)
        .await
        .map_err(ProvisionError::Provider)?;
    Ok(all
        .into_iter()
        .filter(|instance| conn.classify(&instance.raw_state) != StateBucket::Terminal)
        .collect())
}

/// Polls until the provider reports the instance active.
async fn await_active<C>(
    conn: &C,
    instance_id: &str,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<Instance, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    let snapshot = wait_until(
        conn,
        instance_id,
        |instance| {
            instance.is_some_and(|inst| conn.classify(&inst.raw_state) == StateBucket::Active)
        },
        policy,
        cancel,
    )
    .await
    .map_err(|err| from_wait(err, "server readiness"))?;
    // The predicate only holds for a live snapshot.
    snapshot.map_or_else(
        || {
            Err(ProvisionError::Vanished {
                instance_id: instance_id.to_owned(),
            })
        },
        Ok,
    )
}

/// Decides between creating a new instance and restarting a recoverable
/// one, then blocks until the machine is ready and addressable.
///
/// Terminal namesakes are ignored. Any running namesake rejects the
/// request; more than one stopped namesake makes the restart target
/// undecidable and also rejects it. Exactly one stopped namesake is
/// powered on instead of creating a duplicate. A caller-supplied
/// credential is preserved unchanged on both paths; a provider-generated
/// admin password is adopted only when the caller supplied no credential
/// and the instance was freshly created.
///
/// # Errors
///
/// Returns [`ProvisionError::Validation`] for a blank name or an
/// unresolvable login user, [`ProvisionError::DuplicateResource`] and
/// [`ProvisionError::AmbiguousResource`] per the policy above,
/// [`ProvisionError::MissingAddress`] when the ready instance has no
/// usable address, and timeout, cancellation, or provider errors from the
/// readiness wait.
pub async fn create_or_recover<C>(
    conn: &C,
    name: &str,
    spec: &C::CreateSpec,
    access_user: Option<String>,
    credential: Option<Credential>,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<ManagedServer, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    let server_name = validated_name(name)?;
    let existing = live_instances(conn, server_name).await?;
    let (active, recoverable): (Vec<_>, Vec<_>) = existing
        .into_iter()
        .partition(|instance| conn.classify(&instance.raw_state) == StateBucket::Active);

    if !active.is_empty() {
        for instance in &active {
            tracing::warn!(
                name = server_name,
                id = instance.id.as_str(),
                state = instance.raw_state.as_str(),
                "server with the same name is already running"
            );
        }
        return Err(ProvisionError::DuplicateResource {
            name: server_name.to_owned(),
            states: active
                .into_iter()
                .map(|instance| instance.raw_state)
                .collect(),
        });
    }
    if recoverable.len() > 1 {
        return Err(ProvisionError::AmbiguousResource {
            name: server_name.to_owned(),
            count: recoverable.len(),
        });
    }

    let Some(resolved_user) = access_user.or_else(|| conn.default_access_user(spec.os_label()))
    else {
        return Err(ProvisionError::Validation(format!(
            "no access user given and provider '{}' has no default for this image",
            conn.provider()
        )));
    };

    let (instance, generated_password) =
        if let Some(stopped) = recoverable.into_iter().next() {
            tracing::info!(
                name = server_name,
                id = stopped.id.as_str(),
                "found stopped server, restarting it"
            );
            conn.start_instance(&stopped.id)
                .await
                .map_err(ProvisionError::Provider)?;
            (stopped, None)
        } else {
            let created = conn
                .create_instance(server_name, spec)
                .await
                .map_err(ProvisionError::Provider)?;
            let password = created.admin_password.clone();
            (created, password)
        };

    let ready = await_active(conn, &instance.id, policy, cancel).await?;
    let address =
        conn.resolve_address(&ready)
            .ok_or_else(|| ProvisionError::MissingAddress {
                instance_id: ready.id.clone(),
            })?;

    let resolved_credential =
        credential.or_else(|| generated_password.map(Credential::Password));

    tracing::info!(
        name = server_name,
        id = ready.id.as_str(),
        address = %address,
        user = resolved_user.as_str(),
        "server is ready"
    );
    Ok(ManagedServer {
        name: server_name.to_owned(),
        ip_address: Some(address),
        access_user: Some(resolved_user),
        access_credential: resolved_credential,
        instance: ready,
    })
}

/// Resolves one existing non-terminal instance to a [`ManagedServer`]
/// without waiting or changing its state.
///
/// # Errors
///
/// Returns [`ProvisionError::NotFound`] when no non-terminal namesake
/// exists and [`ProvisionError::AmbiguousResource`] when several do.
pub async fn lookup<C>(
    conn: &C,
    name: &str,
    access_user: Option<String>,
    credential: Option<Credential>,
    os: Option<&str>,
) -> Result<ManagedServer, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    let server_name = validated_name(name)?;
    let mut matches = live_instances(conn, server_name).await?;
    if matches.len() > 1 {
        return Err(ProvisionError::AmbiguousResource {
            name: server_name.to_owned(),
            count: matches.len(),
        });
    }
    let Some(instance) = matches.pop() else {
        return Err(ProvisionError::NotFound {
            name: server_name.to_owned(),
        });
    };
    let address = conn.resolve_address(&instance);
    let resolved_user = access_user.or_else(|| conn.default_access_user(os));
    Ok(ManagedServer {
        name: server_name.to_owned(),
        ip_address: address,
        access_user: resolved_user,
        access_credential: credential,
        instance,
    })
}

/// Lists the id and raw state of every non-terminal namesake.
///
/// # Errors
///
/// Returns [`ProvisionError::Provider`] for a failed listing.
pub async fn server_statuses<C>(
    conn: &C,
    name: &str,
) -> Result<Vec<(String, String)>, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    let live = live_instances(conn, validated_name(name)?).await?;
    Ok(live
        .into_iter()
        .map(|instance| (instance.id, instance.raw_state))
        .collect())
}

/// Powers on the server's instance and waits until it reports active.
///
/// # Errors
///
/// Returns timeout, cancellation, or provider errors from the wait.
pub async fn start_server<C>(
    conn: &C,
    server: &ManagedServer,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<Instance, ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    conn.start_instance(&server.instance.id)
        .await
        .map_err(ProvisionError::Provider)?;
    await_active(conn, &server.instance.id, policy, cancel).await
}

/// Powers off the server's instance and waits until the provider reports
/// it recoverable.
///
/// # Errors
///
/// Returns timeout, cancellation, or provider errors from the wait.
pub async fn stop_server<C>(
    conn: &C,
    server: &ManagedServer,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<(), ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    conn.stop_instance(&server.instance.id)
        .await
        .map_err(ProvisionError::Provider)?;
    wait_until(
        conn,
        &server.instance.id,
        |instance| {
            instance.is_some_and(|inst| conn.classify(&inst.raw_state) == StateBucket::Recoverable)
        },
        policy,
        cancel,
    )
    .await
    .map_err(|err| from_wait(err, "server stop"))?;
    Ok(())
}

/// Destroys the server's instance and waits until the provider reports it
/// gone or terminal.
///
/// # Errors
///
/// Returns timeout, cancellation, or provider errors from the wait.
pub async fn destroy_server<C>(
    conn: &C,
    server: &ManagedServer,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<(), ProvisionError<C::Error>>
where
    C: CloudConnection,
{
    tracing::info!(
        name = server.name.as_str(),
        id = server.instance.id.as_str(),
        "destroying server"
    );
    conn.destroy_instance(&server.instance.id)
        .await
        .map_err(ProvisionError::Provider)?;
    wait_until(
        conn,
        &server.instance.id,
        |instance| {
            instance.is_none_or(|inst| conn.classify(&inst.raw_state) == StateBucket::Terminal)
        },
        policy,
        cancel,
    )
    .await
    .map_err(|err| from_wait(err, "server destruction"))?;
    Ok(())
}
