//! Behavioural tests for lifecycle reconciliation driven through real
//! provider connections with a scripted SDK adapter.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8PathBuf;
use stratus::providers::aws::{AwsConnection, AwsCreateSpec, AwsCredentials};
use stratus::providers::rackspace::{
    RackspaceConnection, RackspaceCreateSpec, RackspaceCredentials,
};
use stratus::{
    ApiError, CancelToken, ComputeApi, ConnectionFuture, Credential, Instance, ProvisionError,
    WaitPolicy, create_or_recover,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|err| panic!("lock poisoned: {err}"))
}

/// Scripted in-memory SDK adapter shared between the test and the
/// connection under test.
struct ScriptedApi<Spec> {
    instances: Mutex<Vec<Instance>>,
    created: Mutex<Vec<String>>,
    started: Mutex<Vec<String>>,
    active_state: &'static str,
    create_admin_password: Option<String>,
    _spec: PhantomData<fn(Spec)>,
}

impl<Spec> ScriptedApi<Spec> {
    fn new(active_state: &'static str, instances: Vec<Instance>) -> Arc<Self> {
        Arc::new(Self {
            instances: Mutex::new(instances),
            created: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            active_state,
            create_admin_password: None,
            _spec: PhantomData,
        })
    }
}

struct SharedApi<Spec>(Arc<ScriptedApi<Spec>>);

impl<Spec: Send + Sync> ComputeApi<Spec> for SharedApi<Spec> {
    fn list_by_name<'a>(&'a self, name: &'a str) -> ConnectionFuture<'a, Vec<Instance>, ApiError> {
        Box::pin(async move {
            Ok(lock(&self.0.instances)
                .iter()
                .filter(|instance| instance.name == name)
                .cloned()
                .collect())
        })
    }

    fn create<'a>(
        &'a self,
        name: &'a str,
        _spec: &'a Spec,
    ) -> ConnectionFuture<'a, Instance, ApiError> {
        Box::pin(async move {
            lock(&self.0.created).push(name.to_owned());
            let mut instance = Instance::new("srv-new", name, self.0.active_state);
            instance.public_ip = Some(String::from("203.0.113.10"));
            instance.admin_password = self.0.create_admin_password.clone();
            lock(&self.0.instances).push(instance.clone());
            Ok(instance)
        })
    }

    fn power_on<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError> {
        Box::pin(async move {
            lock(&self.0.started).push(instance_id.to_owned());
            for instance in lock(&self.0.instances).iter_mut() {
                if instance.id == instance_id {
                    instance.raw_state = self.0.active_state.to_owned();
                    instance.public_ip = Some(String::from("203.0.113.10"));
                }
            }
            Ok(())
        })
    }

    fn power_off<'a>(&'a self, _instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError> {
        Box::pin(async { Ok(()) })
    }

    fn destroy<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError> {
        Box::pin(async move {
            lock(&self.0.instances).retain(|instance| instance.id != instance_id);
            Ok(())
        })
    }

    fn describe<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ConnectionFuture<'a, Option<Instance>, ApiError> {
        Box::pin(async move {
            Ok(lock(&self.0.instances)
                .iter()
                .find(|instance| instance.id == instance_id)
                .cloned())
        })
    }
}

fn aws_credentials() -> AwsCredentials {
    AwsCredentials {
        access_key_id: String::from("AKIA-TEST"),
        secret_access_key: String::from("secret"),
        region: String::from("eu-west-1"),
    }
}

fn aws_connection(api: &Arc<ScriptedApi<AwsCreateSpec>>) -> AwsConnection {
    let handle = Arc::clone(api);
    AwsConnection::new(aws_credentials(), move |_| {
        Box::new(SharedApi(Arc::clone(&handle)))
    })
}

/// AWS spec whose key-file check passes.
fn aws_spec(key_file: &tempfile::NamedTempFile) -> AwsCreateSpec {
    let ssh_key = Utf8PathBuf::from_path_buf(key_file.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-UTF-8 temp path: {}", path.display()));
    AwsCreateSpec {
        ssh_key,
        ..AwsCreateSpec::default()
    }
}

fn key_file() -> tempfile::NamedTempFile {
    tempfile::NamedTempFile::new().unwrap_or_else(|err| panic!("failed to create temp key: {err}"))
}

fn fast_policy() -> WaitPolicy {
    WaitPolicy {
        interval: Duration::from_millis(1),
        max_attempts: 10,
    }
}

fn named(id: &str, name: &str, state: &str) -> Instance {
    Instance::new(id, name, state)
}

#[tokio::test]
async fn running_namesake_rejects_creation_regardless_of_others() {
    let api = ScriptedApi::new(
        "running",
        vec![
            named("i-1", "web", "running"),
            named("i-2", "web", "stopped"),
            named("i-3", "web", "terminated"),
        ],
    );
    let conn = aws_connection(&api);
    let key = key_file();
    let err = create_or_recover(
        &conn,
        "web",
        &aws_spec(&key),
        None,
        None,
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .expect_err("running namesake should reject the request");
    assert!(matches!(err, ProvisionError::DuplicateResource { .. }));
    assert!(lock(&api.created).is_empty());
    assert!(lock(&api.started).is_empty());
}

#[tokio::test]
async fn terminal_instances_are_invisible_to_creation() {
    let api = ScriptedApi::new("running", vec![named("i-old", "web", "terminated")]);
    let conn = aws_connection(&api);
    let key = key_file();
    let server = create_or_recover(
        &conn,
        "web",
        &aws_spec(&key),
        None,
        None,
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .unwrap_or_else(|err| panic!("creation should proceed past terminal namesakes: {err}"));
    assert_eq!(lock(&api.created).as_slice(), ["web"]);
    assert_eq!(
        server.ip_address.map(|ip| ip.to_string()),
        Some(String::from("203.0.113.10"))
    );
    // Default user comes from the ubuntu OS label on the default spec.
    assert_eq!(server.access_user.as_deref(), Some("ubuntu"));
}

#[tokio::test]
async fn single_stopped_namesake_restarts_and_keeps_the_caller_credential() {
    let api = ScriptedApi::new("running", vec![named("i-1", "web", "stopped")]);
    let conn = aws_connection(&api);
    let key = key_file();
    let credential = Credential::Password(String::from("caller-pw"));
    let server = create_or_recover(
        &conn,
        "web",
        &aws_spec(&key),
        None,
        Some(credential.clone()),
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .unwrap_or_else(|err| panic!("restart should succeed: {err}"));
    assert_eq!(lock(&api.started).as_slice(), ["i-1"]);
    assert!(lock(&api.created).is_empty());
    assert_eq!(server.access_credential, Some(credential));
}

#[tokio::test]
async fn two_stopped_namesakes_are_ambiguous() {
    let api = ScriptedApi::new(
        "running",
        vec![named("i-1", "web", "stopped"), named("i-2", "web", "stopped")],
    );
    let conn = aws_connection(&api);
    let key = key_file();
    let err = create_or_recover(
        &conn,
        "web",
        &aws_spec(&key),
        None,
        None,
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .expect_err("two stopped namesakes should be ambiguous");
    assert!(matches!(
        err,
        ProvisionError::AmbiguousResource { count: 2, .. }
    ));
    assert!(lock(&api.started).is_empty());
}

#[tokio::test]
async fn rackspace_generated_password_becomes_the_credential() {
    let api = Arc::new(ScriptedApi::<RackspaceCreateSpec> {
        instances: Mutex::new(Vec::new()),
        created: Mutex::new(Vec::new()),
        started: Mutex::new(Vec::new()),
        active_state: "ACTIVE",
        create_admin_password: Some(String::from("generated-pw")),
        _spec: PhantomData,
    });
    let handle = Arc::clone(&api);
    let conn = RackspaceConnection::new(
        RackspaceCredentials {
            username: String::from("ops"),
            api_key: String::from("key"),
            region: String::from("lon"),
        },
        move |_| Box::new(SharedApi(Arc::clone(&handle))),
    );
    let spec = RackspaceCreateSpec {
        image_id: String::from("img-1"),
        ..RackspaceCreateSpec::default()
    };
    let server = create_or_recover(
        &conn,
        "web",
        &spec,
        None,
        None,
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .unwrap_or_else(|err| panic!("creation should succeed: {err}"));
    assert_eq!(
        server.access_credential,
        Some(Credential::Password(String::from("generated-pw")))
    );
    assert_eq!(server.access_user.as_deref(), Some("root"));
}

#[tokio::test]
async fn sdk_adapter_is_built_once_and_reused() {
    let api = ScriptedApi::new("running", vec![named("i-old", "web", "terminated")]);
    let builds = Arc::new(AtomicU32::new(0));
    let handle = Arc::clone(&api);
    let build_counter = Arc::clone(&builds);
    let conn = AwsConnection::new(aws_credentials(), move |_| {
        build_counter.fetch_add(1, Ordering::SeqCst);
        Box::new(SharedApi(Arc::clone(&handle)))
    });
    let key = key_file();
    create_or_recover(
        &conn,
        "web",
        &aws_spec(&key),
        None,
        None,
        &fast_policy(),
        &CancelToken::new(),
    )
    .await
    .unwrap_or_else(|err| panic!("creation should succeed: {err}"));
    // One listing, one create, and several describes all share one adapter.
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}
