mod common;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rvdbg::config::{DsuConfig, GenericClientConfig, JtagTapConfig, ProtocolConfig, ServerConfig};
use rvdbg::{Acceptor, DebugSessionUnit, SimulatedPlatform};

use common::init_logging;

fn serve(protocol: ProtocolConfig, harts: &[&str]) -> (Acceptor, Arc<DebugSessionUnit>) {
    init_logging();
    let platform = Arc::new(SimulatedPlatform::new(harts).unwrap());
    let config = DsuConfig {
        harts: harts.iter().map(|name| name.to_string()).collect(),
        ..DsuConfig::default()
    };
    let dsu = DebugSessionUnit::from_config(platform, &config);

    let mut acceptor = Acceptor::new(
        ServerConfig {
            host_port: 0,
            timeout: Duration::from_millis(100),
            protocol,
            ..ServerConfig::default()
        },
        dsu.clone(),
    );
    acceptor.start().unwrap();
    (acceptor, dsu)
}

fn greeting() -> ProtocolConfig {
    ProtocolConfig::Generic(GenericClientConfig {
        platform_config: serde_json::json!({ "name": "river" }),
        listen_default_output: true,
    })
}

struct LineClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl LineClient {
    fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        }
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn request(&mut self, request: &str) -> String {
        writeln!(self.writer, "{request}").unwrap();
        self.line()
    }
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn unset_host_binds_loopback() {
    let (acceptor, _dsu) = serve(greeting(), &["core0"]);

    let address = acceptor.local_addr().unwrap();
    assert_eq!(address.ip(), Ipv4Addr::LOCALHOST);
    assert_ne!(address.port(), 0);
    assert!(acceptor.is_running());
}

#[test]
fn disabled_endpoint_does_not_listen() {
    init_logging();
    let platform = Arc::new(SimulatedPlatform::new(&["core0"]).unwrap());
    let dsu = DebugSessionUnit::from_config(platform, &DsuConfig::default());

    let mut acceptor = Acceptor::new(
        ServerConfig {
            enable: false,
            host_port: 0,
            ..ServerConfig::default()
        },
        dsu,
    );
    acceptor.start().unwrap();

    assert!(!acceptor.is_running());
    assert_eq!(acceptor.local_addr(), None);
}

#[test]
fn clients_get_sequential_names() {
    let (acceptor, _dsu) = serve(greeting(), &["core0", "core1"]);
    let address = acceptor.local_addr().unwrap();

    let mut clients = (0..3)
        .map(|_| LineClient::connect(address))
        .collect::<Vec<_>>();
    let greetings = clients
        .iter_mut()
        .map(LineClient::line)
        .collect::<Vec<_>>();

    assert_eq!(
        greetings,
        vec![
            "client0 generic harts=2",
            "client1 generic harts=2",
            "client2 generic harts=2",
        ]
    );
    assert!(wait_for(|| acceptor.session_names() == ["client0", "client1", "client2"]));
}

#[test]
fn generic_protocol_round_trip() {
    let (acceptor, _dsu) = serve(greeting(), &["core0", "core1"]);
    let mut client = LineClient::connect(acceptor.local_addr().unwrap());
    client.line();

    assert_eq!(client.request("harts"), "2");
    assert_eq!(client.request("halt 1"), "OK");
    assert_eq!(client.request("select 1"), "OK");
    assert_eq!(client.request("halted"), "1");
    assert_eq!(client.request("wrreg 0x7b1 0x80000010"), "OK");
    assert_eq!(client.request("rdreg 0x7b1"), "0x80000010");
    assert_eq!(client.request("platform"), r#"{"name":"river"}"#);
    assert_eq!(
        client.request("select 9"),
        "ERR Hart 9 does not exist or could not be resolved."
    );
    assert_eq!(client.request("quit"), "OK");
}

#[test]
fn sessions_keep_their_own_selection() {
    let (acceptor, _dsu) = serve(greeting(), &["core0", "core1"]);
    let address = acceptor.local_addr().unwrap();
    let mut first = LineClient::connect(address);
    let mut second = LineClient::connect(address);
    first.line();
    second.line();

    assert_eq!(first.request("select 1"), "OK");
    assert_eq!(first.request("wrreg 0x300 7"), "OK");

    assert_eq!(second.request("current"), "0");
    assert_eq!(second.request("rdreg 0x300"), "0x0");
    assert_eq!(first.request("rdreg 0x300"), "0x7");
}

#[test]
fn bitbang_idcode_scan() {
    let (acceptor, _dsu) = serve(
        ProtocolConfig::Openocd(JtagTapConfig::default()),
        &["core0"],
    );
    let mut stream = TcpStream::connect(acceptor.local_addr().unwrap()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Reset the TAP, then walk to Shift-DR.
    stream.write_all(b"t2626262626r04260404").unwrap();

    let mut scan = Vec::new();
    for _ in 0..32 {
        scan.extend_from_slice(b"0R4");
    }
    stream.write_all(&scan).unwrap();

    let mut tdo = [0u8; 32];
    stream.read_exact(&mut tdo).unwrap();
    stream.write_all(b"Q").unwrap();

    let idcode = tdo
        .iter()
        .enumerate()
        .fold(0u32, |idcode, (bit, &level)| {
            idcode | (u32::from(level == b'1') << bit)
        });
    assert_eq!(idcode, JtagTapConfig::default().idcode);
}

#[test]
fn finished_sessions_are_reaped() {
    let (acceptor, _dsu) = serve(greeting(), &["core0"]);
    let mut client = LineClient::connect(acceptor.local_addr().unwrap());
    client.line();
    assert!(wait_for(|| acceptor.session_names() == ["client0"]));

    assert_eq!(client.request("quit"), "OK");
    drop(client);

    assert!(wait_for(|| acceptor.session_names().is_empty()));
}

#[test]
fn stop_closes_sessions() {
    let (mut acceptor, _dsu) = serve(greeting(), &["core0"]);
    let address = acceptor.local_addr().unwrap();
    let mut client = LineClient::connect(address);
    client.line();

    acceptor.stop();

    assert!(!acceptor.is_running());
    assert!(acceptor.session_names().is_empty());

    let mut rest = String::new();
    assert_eq!(client.reader.read_line(&mut rest).unwrap_or(0), 0);
    assert!(TcpStream::connect(address).is_err());
}
