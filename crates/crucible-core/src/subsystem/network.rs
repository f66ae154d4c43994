//! Network subsystem: loopback UDP pump and interface throughput

use super::procfs::{self, NetCounters};
use super::{HostPaths, Subsystem, Throttle};
use crate::error::{LoadError, SampleError};
use crate::models::{Reading, SubsystemKind};
use crate::monitor::{rate, DeltaTracker, Sampler};
use crate::worker::{LoadUnit, WorkerContext};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DATAGRAM_BYTES: usize = 1400;
const BURST: usize = 16;
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

pub struct NetworkSubsystem {
    paths: HostPaths,
    cpus: usize,
}

impl NetworkSubsystem {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            cpus: num_cpus::get().max(1),
        }
    }
}

impl Subsystem for NetworkSubsystem {
    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Network
    }

    fn natural_concurrency(&self) -> usize {
        self.cpus.min(8)
    }

    fn sampler(&self) -> Box<dyn Sampler> {
        Box::new(NetworkSampler {
            net_dev: self.paths.proc("net/dev"),
            rx: DeltaTracker::new(),
            tx: DeltaTracker::new(),
        })
    }

    fn load_unit(&self, intensity: Option<u8>) -> Arc<dyn LoadUnit> {
        Arc::new(LoopbackPump {
            throttle: Throttle::new(intensity),
        })
    }
}

struct NetworkSampler {
    net_dev: PathBuf,
    rx: DeltaTracker<u64>,
    tx: DeltaTracker<u64>,
}

impl Sampler for NetworkSampler {
    fn snapshot(&mut self) -> Result<Vec<Reading>, SampleError> {
        let NetCounters { rx_bytes, tx_bytes } = procfs::read_net_dev(&self.net_dev)?;
        let rx = self.rx.observe(rx_bytes, |p, c, e| rate(*p, *c, e));
        let tx = self.tx.observe(tx_bytes, |p, c, e| rate(*p, *c, e));

        Ok(vec![
            Reading::new("rx_bytes", rx, "B/s"),
            Reading::new("tx_bytes", tx, "B/s"),
        ])
    }
}

/// Sends bursts of datagrams to itself over the loopback interface
struct LoopbackPump {
    throttle: Throttle,
}

impl LoadUnit for LoopbackPump {
    fn run(&self, ctx: &WorkerContext) -> Result<(), LoadError> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.connect(socket.local_addr()?)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;

        let payload = [ctx.index as u8; DATAGRAM_BYTES];
        let mut inbox = [0u8; DATAGRAM_BYTES];

        self.throttle.drive(ctx, || {
            for _ in 0..BURST {
                socket.send(&payload)?;
            }
            for _ in 0..BURST {
                match socket.recv(&mut inbox) {
                    Ok(_) => {}
                    // Loopback may drop under pressure; the next burst carries on
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        break
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }
}
