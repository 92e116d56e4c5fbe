//! Server assembly: configuration, transport binding, portmap publication.
//!
//! The builder owns everything a running server shares (program
//! registrations, the GSS session table, the retransmission tracker, codec
//! policy) and hands it to the transports behind one `Arc`. `bind()`
//! completes once every requested listener is bound, so callers can
//! register with an external portmapper or start clients the moment it
//! returns.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tracing::{info, warn};

use crate::auth::GssAuthenticator;
use crate::portmap_client::PortmapClient;
use crate::rpc::context::SharedState;
use crate::rpc::dispatcher::{ProgramRegistry, RpcHandler};
use crate::rpc::transaction_tracker::TransactionTracker;
use crate::rpc::DEFAULT_MAX_RECORD_SIZE;
use crate::tcp::TcpTransport;
use crate::transport::RpcTransport;
use crate::udp::UdpTransport;
use crate::xdr::portmap::{mapping, IPPROTO_TCP, IPPROTO_UDP};
use crate::xdr::XdrConfig;

/// How long completed transactions are remembered for retransmission
/// detection.
const TRANSACTION_RETENTION: Duration = Duration::from_secs(60);

/// Which transports to bind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocols {
    Tcp,
    Udp,
    Both,
}

impl Protocols {
    fn tcp(self) -> bool {
        matches!(self, Protocols::Tcp | Protocols::Both)
    }

    fn udp(self) -> bool {
        matches!(self, Protocols::Udp | Protocols::Both)
    }
}

/// Configures and binds an RPC server.
pub struct RpcServerBuilder {
    bind_ip: String,
    ports: RangeInclusive<u16>,
    protocols: Protocols,
    publish_to_portmap: bool,
    service_name: String,
    worker_tasks: usize,
    max_record_size: usize,
    idle_timeout: Option<Duration>,
    xdr: XdrConfig,
    gss: Option<GssAuthenticator>,
    registrations: Vec<(u32, u32, Arc<dyn RpcHandler>)>,
}

impl RpcServerBuilder {
    /// Starts a builder serving on one fixed port.
    pub fn new(port: u16) -> Self {
        Self::with_port_range(port..=port)
    }

    /// Starts a builder that binds the first free port in the range.
    pub fn with_port_range(ports: RangeInclusive<u16>) -> Self {
        RpcServerBuilder {
            bind_ip: "0.0.0.0".to_string(),
            ports,
            protocols: Protocols::Both,
            publish_to_portmap: true,
            service_name: "ONCRPC Service".to_string(),
            worker_tasks: 4,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            idle_timeout: None,
            xdr: XdrConfig::default(),
            gss: None,
            registrations: Vec::new(),
        }
    }

    /// Local address to bind; defaults to all interfaces.
    pub fn bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.bind_ip = ip.into();
        self
    }

    /// Which transports to serve; defaults to both TCP and UDP.
    pub fn protocols(mut self, protocols: Protocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Whether to advertise registrations to the local portmapper;
    /// defaults to true.
    pub fn publish_to_portmap(mut self, publish: bool) -> Self {
        self.publish_to_portmap = publish;
        self
    }

    /// Service name used in logs; defaults to "ONCRPC Service".
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Parallel-dispatch budget for UDP; at least 1.
    pub fn worker_tasks(mut self, count: usize) -> Self {
        self.worker_tasks = count.max(1);
        self
    }

    /// Ceiling on an assembled TCP record; defaults to 1 MiB.
    pub fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Closes TCP connections idle for this long; the default is no idle
    /// closure at all.
    pub fn idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Codec policy (strict booleans and friends).
    pub fn xdr_config(mut self, config: XdrConfig) -> Self {
        self.xdr = config;
        self
    }

    /// Enables RPCSEC_GSS with the given authenticator.
    pub fn gss(mut self, authenticator: GssAuthenticator) -> Self {
        self.gss = Some(authenticator);
        self
    }

    /// Registers a handler for (program, version).
    pub fn register(mut self, prog: u32, vers: u32, handler: Arc<dyn RpcHandler>) -> Self {
        self.registrations.push((prog, vers, handler));
        self
    }

    /// Binds the requested transports and publishes registrations to the
    /// portmapper. Completes once every listener is bound.
    pub async fn bind(self) -> anyhow::Result<RpcServer> {
        let registry = ProgramRegistry::new();
        for (prog, vers, handler) in self.registrations {
            registry.register(prog, vers, handler);
        }
        let shared = Arc::new(SharedState {
            registry,
            gss: self.gss,
            transaction_tracker: TransactionTracker::new(TRANSACTION_RETENTION),
            max_record_size: self.max_record_size,
            idle_timeout: self.idle_timeout,
            xdr: self.xdr,
        });

        let tcp = if self.protocols.tcp() {
            Some(
                TcpTransport::bind_range(&self.bind_ip, self.ports.clone(), shared.clone())
                    .await
                    .context("binding TCP transport")?,
            )
        } else {
            None
        };
        let udp = if self.protocols.udp() {
            // With both protocols requested, UDP shares the port TCP got so
            // one portmap entry per protocol points at the same number.
            let transport = match &tcp {
                Some(tcp) => {
                    UdpTransport::bind(
                        &self.bind_ip,
                        tcp.local_port(),
                        shared.clone(),
                        self.worker_tasks,
                    )
                    .await
                }
                None => {
                    UdpTransport::bind_range(
                        &self.bind_ip,
                        self.ports.clone(),
                        shared.clone(),
                        self.worker_tasks,
                    )
                    .await
                }
            };
            Some(transport.context("binding UDP transport")?)
        } else {
            None
        };

        let mut server = RpcServer {
            shared,
            tcp,
            udp,
            service_name: self.service_name,
            published: Vec::new(),
        };
        info!(
            "{} bound (tcp: {:?}, udp: {:?})",
            server.service_name,
            server.tcp_port(),
            server.udp_port()
        );
        if self.publish_to_portmap {
            server.publish().await;
        }
        Ok(server)
    }
}

/// A bound server: transports plus the shared state behind them.
pub struct RpcServer {
    shared: Arc<SharedState>,
    tcp: Option<TcpTransport>,
    udp: Option<UdpTransport>,
    service_name: String,
    published: Vec<mapping>,
}

impl RpcServer {
    /// The registry, for registrations after bind.
    pub fn registry(&self) -> &ProgramRegistry {
        &self.shared.registry
    }

    /// Port the TCP transport is bound to, when one exists.
    pub fn tcp_port(&self) -> Option<u16> {
        self.tcp.as_ref().map(|t| t.local_port())
    }

    /// Port the UDP transport is bound to, when one exists.
    pub fn udp_port(&self) -> Option<u16> {
        self.udp.as_ref().map(|t| t.local_port())
    }

    /// Runs the bound transports until one fails.
    pub async fn serve(&self) -> std::io::Result<()> {
        info!("{} serving", self.service_name);
        match (&self.tcp, &self.udp) {
            (Some(tcp), Some(udp)) => {
                tokio::try_join!(tcp.handle_forever(), udp.handle_forever())?;
                Ok(())
            }
            (Some(tcp), None) => tcp.handle_forever().await,
            (None, Some(udp)) => udp.handle_forever().await,
            (None, None) => Ok(()),
        }
    }

    /// Advertises every registration to the local portmapper, one SET per
    /// (program, version, protocol). Best effort: failures are logged and
    /// the server keeps running.
    pub async fn publish(&mut self) {
        let mut client = match PortmapClient::local().await {
            Ok(client) => client,
            Err(e) => {
                warn!("portmapper unreachable, skipping publication: {e:?}");
                return;
            }
        };
        for map in self.bindings() {
            match client.set(map).await {
                Ok(true) => self.published.push(map),
                Ok(false) => {
                    warn!(
                        "portmapper already holds a mapping for program {} version {} prot {}",
                        map.prog, map.vers, map.prot
                    );
                }
                Err(e) => warn!("portmap SET failed: {e:?}"),
            }
        }
    }

    /// Withdraws previously published registrations. Called on shutdown.
    pub async fn deregister(&mut self) {
        if self.published.is_empty() {
            return;
        }
        let mut client = match PortmapClient::local().await {
            Ok(client) => client,
            Err(e) => {
                warn!("portmapper unreachable, leaving registrations behind: {e:?}");
                return;
            }
        };
        for map in self.published.drain(..) {
            if let Err(e) = client.unset(map).await {
                warn!("portmap UNSET failed: {e:?}");
            }
        }
    }

    /// Every (program, version, protocol, port) binding this server serves.
    fn bindings(&self) -> Vec<mapping> {
        let mut out = Vec::new();
        for (prog, vers) in self.shared.registry.registrations() {
            if let Some(port) = self.tcp_port() {
                out.push(mapping { prog, vers, prot: IPPROTO_TCP, port: port as u32 });
            }
            if let Some(port) = self.udp_port() {
                out.push(mapping { prog, vers, prot: IPPROTO_UDP, port: port as u32 });
            }
        }
        out
    }
}
