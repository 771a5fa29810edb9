//! Minimal subscriber over a blocking TCP stream.
//!
//! ```sh
//! RUST_LOG=trace cargo run --example sub_client -- test.mosquitto.org 1883 'mqttlite/demo/#'
//! ```

use std::cell::RefCell;
use std::env;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use mqttlite_client::{
    Client, ConnectOptions, Resolution, Resolver, State, Timer, Transport, QoS,
};

#[derive(Default, Clone)]
struct TcpTransport {
    stream: Rc<RefCell<Option<TcpStream>>>,
}

impl Transport for TcpTransport {
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        *self.stream.borrow_mut() = Some(stream);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.stream.borrow_mut().as_mut() {
            Some(stream) => stream.write_all(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed")),
        }
    }

    fn close(&mut self) {
        *self.stream.borrow_mut() = None;
    }
}

struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&mut self, host_name: &str) -> Resolution {
        match (host_name, 0u16).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => Resolution::Ready(addr.ip()),
                None => Resolution::Failed,
            },
            Err(_) => Resolution::Failed,
        }
    }
}

#[derive(Default, Clone)]
struct PollTimer {
    state: Rc<RefCell<Option<(Instant, Duration)>>>,
}

impl Timer for PollTimer {
    fn arm(&mut self, period: Duration) {
        *self.state.borrow_mut() = Some((Instant::now() + period, period));
    }

    fn cancel(&mut self) {
        *self.state.borrow_mut() = None;
    }
}

impl PollTimer {
    fn due(&self) -> bool {
        matches!(*self.state.borrow(), Some((deadline, _)) if Instant::now() >= deadline)
    }

    fn rearm(&self) {
        let mut state = self.state.borrow_mut();
        if let Some((_, period)) = *state {
            *state = Some((Instant::now() + period, period));
        }
    }
}

fn main() {
    pretty_env_logger::init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "test.mosquitto.org".into());
    let port = args.next().and_then(|p| p.parse().ok()).unwrap_or(1883);
    let filter = args.next().unwrap_or_else(|| "mqttlite/demo/#".into());

    let transport = TcpTransport::default();
    let stream = transport.stream.clone();
    let timer = PollTimer::default();

    let mut client = Client::new(
        transport,
        SystemResolver,
        timer.clone(),
        ConnectOptions::new(host, port, "mqttlite-sub"),
    )
    .on_connect(move |mut handle, status| {
        println!("connected: {}", status);
        handle
            .subscribe(&filter, QoS::AtMostOnce, |_conn, message| {
                match std::str::from_utf8(&message.payload) {
                    Ok(text) => println!("{}: {}", message.topic, text),
                    Err(_) => println!("{}: {:02x?}", message.topic, &message.payload[..]),
                }
            })
            .ok();
    })
    .on_disconnect(|_handle| println!("disconnected"));

    client.connect().expect("connect");

    let mut buf = [0u8; 512];
    loop {
        // blocking connects complete synchronously
        if client.state() == State::TcpConnecting && stream.borrow().is_some() {
            client.handle_connected();
        }

        if timer.due() {
            timer.rearm();
            client.handle_timer();
        }

        let read = {
            let mut guard = stream.borrow_mut();
            match guard.as_mut() {
                Some(stream) => match stream.read(&mut buf) {
                    Ok(n) => Some(Ok(n)),
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::TimedOut =>
                    {
                        None
                    }
                    Err(err) => Some(Err(err)),
                },
                None => None,
            }
        };

        match read {
            Some(Ok(0)) => {
                stream.borrow_mut().take();
                client.handle_disconnected();
            }
            Some(Ok(n)) => client.handle_recv(&buf[..n]),
            Some(Err(err)) => {
                stream.borrow_mut().take();
                client.handle_error(err);
                client.handle_disconnected();
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
}
