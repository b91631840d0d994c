//! Behavioural tests for activation, dispatch and the serve lifecycle.

use std::cell::RefCell;
use std::net::TcpListener;
use std::path::PathBuf;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use plugin_sdk_config::TransportConfig;

use crate::{CONTENT_TYPE_V1_1, PluginServer, Response, ServeError};

use super::harness::{Dirs, RawResponse, RunningServer, post_once};

const PLUGIN_NAME: &str = "behaviour";

struct ServerWorld {
    dirs: Dirs,
    server: Option<PluginServer>,
    running: Option<RunningServer>,
    reserved: Option<TcpListener>,
    response: Option<RawResponse>,
    spec_path: Option<PathBuf>,
    outcome: Option<Result<(), ServeError>>,
}

impl ServerWorld {
    fn new() -> Self {
        Self {
            dirs: Dirs::new(),
            server: Some(PluginServer::new()),
            running: None,
            reserved: None,
            response: None,
            spec_path: None,
            outcome: None,
        }
    }

    fn server_mut(&mut self) -> &mut PluginServer {
        self.server.as_mut().expect("server not yet serving")
    }

    fn register(&mut self, driver: &str, path: &str) {
        let body = path.trim_start_matches('/').to_owned();
        let route = path.to_owned();
        self.server_mut().register_driver(driver, move |router| {
            let body = body.clone();
            router.handle_func(route.clone(), move |_request| {
                Response::new(body.clone().into_bytes())
            });
        });
    }

    fn serve(&mut self, address: &str) {
        let server = self.server.take().expect("server not yet serving");
        let transport = TransportConfig::tcp(address, PLUGIN_NAME);
        match RunningServer::start(server, &self.dirs.provisioner(), &transport) {
            Ok(running) => {
                self.spec_path = running.spec_path().map(PathBuf::from);
                self.running = Some(running);
            }
            Err(error) => self.outcome = Some(Err(error.into())),
        }
    }

    fn running(&self) -> &RunningServer {
        self.running.as_ref().expect("server is running")
    }

    fn response(&self) -> &RawResponse {
        self.response.as_ref().expect("a request was sent")
    }

    fn expected_spec_path(&self) -> PathBuf {
        self.dirs
            .spec_dir()
            .join(format!("{PLUGIN_NAME}.spec"))
            .into_std_path_buf()
    }
}

#[fixture]
fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::new())
}

#[given("a plugin server with driver {driver} handling {path}")]
fn given_driver(world: &RefCell<ServerWorld>, driver: String, path: String) {
    world.borrow_mut().register(&driver, &path);
}

#[given("another driver {driver} handling {path}")]
fn given_another_driver(world: &RefCell<ServerWorld>, driver: String, path: String) {
    world.borrow_mut().register(&driver, &path);
}

#[given("the driver {driver} is registered again handling {path}")]
fn given_driver_again(world: &RefCell<ServerWorld>, driver: String, path: String) {
    world.borrow_mut().register(&driver, &path);
}

#[given("an application handler bound to {path}")]
fn given_application_handler(world: &RefCell<ServerWorld>, path: String) {
    world
        .borrow_mut()
        .server_mut()
        .handle_func(path, |_request| Response::new(b"application".to_vec()));
}

#[given("the server is serving on an ephemeral TCP port")]
fn given_serving(world: &RefCell<ServerWorld>) {
    world.borrow_mut().serve("127.0.0.1:0");
    let world = world.borrow();
    assert!(world.outcome.is_none(), "serving failed: {:?}", world.outcome);
}

#[given("a TCP port is already bound")]
fn given_port_bound(world: &RefCell<ServerWorld>) {
    let reserved = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    world.borrow_mut().reserved = Some(reserved);
}

#[when("the host posts to {path}")]
fn when_host_posts(world: &RefCell<ServerWorld>, path: String) {
    let response = post_once(world.borrow().running(), &path, "{}");
    world.borrow_mut().response = Some(response);
}

#[when("the server is served on the bound port")]
fn when_served_on_bound_port(world: &RefCell<ServerWorld>) {
    let address = world
        .borrow()
        .reserved
        .as_ref()
        .and_then(|listener| listener.local_addr().ok())
        .expect("reserved address")
        .to_string();
    world.borrow_mut().serve(&address);
}

#[when("the server is shut down")]
fn when_shut_down(world: &RefCell<ServerWorld>) {
    let running = world.borrow_mut().running.take().expect("server is running");
    world.borrow_mut().outcome = Some(running.stop());
}

#[then("the response status is {status}")]
fn then_status(world: &RefCell<ServerWorld>, status: u16) {
    assert_eq!(world.borrow().response().status, status);
}

#[then("the response content type is the plugin media type")]
fn then_media_type(world: &RefCell<ServerWorld>) {
    assert_eq!(
        world.borrow().response().header("content-type"),
        Some(CONTENT_TYPE_V1_1)
    );
}

#[then("the activation lists exactly {names}")]
fn then_activation_lists(world: &RefCell<ServerWorld>, names: String) {
    let payload = world.borrow().response().json();
    let mut implements: Vec<String> = payload["Implements"]
        .as_array()
        .expect("Implements array")
        .iter()
        .map(|name| name.as_str().expect("driver name").to_owned())
        .collect();
    implements.sort();
    let mut expected: Vec<String> = names.split(',').map(|name| name.trim().to_owned()).collect();
    expected.sort();
    assert_eq!(implements, expected);
}

#[then("the response body is {body}")]
fn then_body(world: &RefCell<ServerWorld>, body: String) {
    assert_eq!(world.borrow().response().text(), body);
}

#[then("the spec file names the bound address")]
fn then_spec_names_address(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    let spec_path = world.spec_path.as_ref().expect("spec path recorded");
    assert_eq!(spec_path, &world.expected_spec_path());
    let contents = std::fs::read_to_string(spec_path).expect("read spec");
    assert_eq!(contents, format!("tcp://{}", world.running().addr()));
}

#[then("the serve call returns successfully")]
fn then_serve_succeeds(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    assert!(
        matches!(world.outcome, Some(Ok(()))),
        "unexpected outcome: {:?}",
        world.outcome
    );
}

#[then("the serve call fails with a provisioning error")]
fn then_serve_fails(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    assert!(
        matches!(world.outcome, Some(Err(ServeError::Provision(_)))),
        "unexpected outcome: {:?}",
        world.outcome
    );
}

#[then("the spec file no longer exists")]
fn then_spec_removed(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    let spec_path = world.spec_path.as_ref().expect("spec path recorded");
    assert!(!spec_path.exists(), "spec file {} remains", spec_path.display());
}

#[then("no spec file was created")]
fn then_no_spec(world: &RefCell<ServerWorld>) {
    let world = world.borrow();
    assert!(world.spec_path.is_none());
    assert!(!world.expected_spec_path().exists());
}

#[scenario(path = "tests/features/plugin_server.feature")]
fn plugin_server(#[from(world)] world: RefCell<ServerWorld>) {
    drop(world);
}
