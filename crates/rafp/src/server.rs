//! Server registry and connection manager.
//!
//! A `Server` is one logical AFP server: its probed identity plus at most
//! one live DSI session. The `Registry` deduplicates servers by address and
//! by the 16 byte signature from the status probe, so two hostnames that
//! resolve to the same machine share one connection.

use {
    crate::{
        auth::{self, Credentials},
        error::Error,
        ops,
        proto::{
            AfpVersion, ServerInfo, ServerType, UamMask, VolumeFlags, AFP_PORT,
            K_FP_BAD_VERS_NUM,
        },
        session::DsiSession,
        utils::Result,
        volume::Volume,
    },
    log::{debug, info, warn},
    std::{
        collections::HashMap,
        fmt::Write as _,
        net::SocketAddr,
        sync::{Arc, Mutex as StdMutex},
    },
    tokio::{net::lookup_host, sync::Mutex},
    unicode_normalization::UnicodeNormalization,
};

/// Everything needed to reach and log in to a server, typically parsed from
/// an `afp://` URL.
#[derive(Clone, Debug)]
pub struct ConnectionRequest {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub volume: String,
    pub volume_password: Option<String>,
    /// Pin a dialect; `None` negotiates the newest mutual one.
    pub version: Option<AfpVersion>,
    pub uam_mask: UamMask,
    pub volume_flags: VolumeFlags,
}

impl Default for ConnectionRequest {
    fn default() -> Self {
        ConnectionRequest {
            hostname: String::new(),
            port: AFP_PORT,
            username: String::new(),
            password: String::new(),
            volume: String::new(),
            volume_password: None,
            version: None,
            uam_mask: UamMask::default_mask(),
            volume_flags: VolumeFlags::default(),
        }
    }
}

/// Where a server sits in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Registered, login round trip still in flight. The connecting task
    /// holds the slot lock, so `phase()` callers block until it settles.
    Connecting,
    Authenticated,
    Suspended,
    Closed,
}

#[derive(Debug)]
struct Slot {
    session: Option<DsiSession>,
    phase: Phase,
}

/// One logical AFP server, shared behind an `Arc`.
#[derive(Debug)]
pub struct Server {
    address: SocketAddr,
    info: ServerInfo,
    server_type: ServerType,
    precomposed_name: String,
    version: AfpVersion,
    uam: UamMask,
    credentials: Credentials,
    slot: Mutex<Slot>,
}

impl Server {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The display name: UTF-8 when the server offers one, normalized to
    /// precomposed form, legacy name otherwise.
    pub fn name(&self) -> &str {
        if self.precomposed_name.is_empty() {
            &self.info.name
        } else {
            &self.precomposed_name
        }
    }

    pub fn version(&self) -> AfpVersion {
        self.version
    }

    pub async fn phase(&self) -> Phase {
        self.slot.lock().await.phase
    }

    /// The live session, or `Closed` when suspended or torn down.
    pub async fn session(&self) -> Result<DsiSession> {
        let slot = self.slot.lock().await;
        match &slot.session {
            Some(session) if session.is_alive() => Ok(session.clone()),
            _ => Err(Error::Transport(crate::error::TransportError::Closed)),
        }
    }

    /// Drop the socket but keep the probed identity and credentials so the
    /// connection can be re-established later.
    pub async fn suspend(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        match slot.session.take() {
            Some(session) => {
                session.close().await;
                slot.phase = Phase::Suspended;
                info!("suspended {}", self.name());
                Ok(())
            }
            None => Err(Error::Transport(crate::error::TransportError::Closed)),
        }
    }

    /// Re-dial and log in again with the stored credentials.
    pub async fn resume(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.session.is_some() {
            return Ok(());
        }
        let session = open_and_login(
            self.address,
            self.version,
            self.uam,
            &self.credentials,
        )
        .await?;
        slot.session = Some(session);
        slot.phase = Phase::Authenticated;
        info!("resumed {}", self.name());
        Ok(())
    }

    /// Log out and close the session for good.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.session.take() {
            if let Err(e) = auth::logout(&session).await {
                debug!("logout from {} failed: {}", self.name(), e);
            }
            session.close().await;
        }
        slot.phase = Phase::Closed;
    }
}

/// Dial, negotiate the DSI session, and drive the login conversation.
async fn open_and_login(
    address: SocketAddr,
    version: AfpVersion,
    uam: UamMask,
    credentials: &Credentials,
) -> Result<DsiSession> {
    let session = DsiSession::connect(address).await?;
    session.open_session().await?;
    match auth::login(&session, version, uam, credentials).await {
        Ok(()) => Ok(session),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

/// Probe a server with a transient connection. The probe session never
/// outlives this call.
pub async fn probe(address: SocketAddr) -> Result<ServerInfo> {
    let session = DsiSession::connect(address).await?;
    let reply = session.get_status().await;
    session.close().await;
    let info = ops::parse_server_info(&reply?.check()?.body)?;
    debug!(
        "probed {}: \"{}\" ({}), versions {:?}",
        address, info.name, info.machine_type, info.versions
    );
    Ok(info)
}

#[derive(Default)]
struct RegistryInner {
    servers: Vec<Arc<Server>>,
    volumes: HashMap<String, Arc<Volume>>,
}

/// Owns every known server and mounted volume.
#[derive(Default)]
pub struct Registry {
    inner: StdMutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    fn find_by_address(&self, address: SocketAddr) -> Option<Arc<Server>> {
        let inner = self.inner.lock().unwrap();
        inner
            .servers
            .iter()
            .find(|s| s.address == address)
            .cloned()
    }

    /// Look up by signature and, when absent, insert the candidate; one lock
    /// acquisition covers both so concurrent connects cannot race in two
    /// entries for the same machine.
    fn adopt_by_signature(&self, candidate: Arc<Server>) -> (Arc<Server>, bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(signature) = candidate.info.signature {
            if let Some(existing) = inner
                .servers
                .iter()
                .find(|s| s.info.signature == Some(signature))
            {
                return (existing.clone(), false);
            }
        }
        inner.servers.push(candidate.clone());
        (candidate, true)
    }

    /// Remove a server that failed to come up. Called at most once per
    /// failed connect.
    fn remove(&self, server: &Arc<Server>) {
        let mut inner = self.inner.lock().unwrap();
        inner.servers.retain(|s| !Arc::ptr_eq(s, server));
    }

    /// Resolve, probe, deduplicate, and authenticate.
    pub async fn connect(&self, request: &ConnectionRequest) -> Result<Arc<Server>> {
        let address = resolve(&request.hostname, request.port).await?;

        if let Some(existing) = self.find_by_address(address) {
            // A Connecting phase can only be observed in the narrow window
            // before the connecting task takes its slot lock; resume() then
            // waits that login out and finds the session already there.
            match existing.phase().await {
                Phase::Authenticated => {
                    debug!("reusing connection to {}", existing.name());
                    return Ok(existing);
                }
                Phase::Connecting | Phase::Suspended => {
                    existing.resume().await?;
                    return Ok(existing);
                }
                Phase::Closed => self.remove(&existing),
            }
        }

        let info = probe(address).await?;

        let version = match request.version {
            Some(version) => version,
            None => info.best_version().ok_or(Error::Afp(K_FP_BAD_VERS_NUM))?,
        };
        let credentials = Credentials {
            username: request.username.clone(),
            password: request.password.clone(),
        };
        let uam = auth::select_uam(info.uam_mask(), request.uam_mask, &credentials)?;

        let precomposed_name = if info.utf8_name.is_empty() {
            String::new()
        } else {
            info.utf8_name.nfc().collect()
        };
        let server_type = ServerType::classify(&info.machine_type);

        let candidate = Arc::new(Server {
            address,
            info,
            server_type,
            precomposed_name,
            version,
            uam,
            credentials,
            slot: Mutex::new(Slot {
                session: None,
                phase: Phase::Connecting,
            }),
        });

        // Hold the candidate's slot across registration and login: anyone
        // who finds this entry meanwhile blocks on the lock instead of
        // seeing a half-connected server and racing in a duplicate.
        let mut slot = candidate.slot.lock().await;
        let (server, inserted) = self.adopt_by_signature(candidate.clone());
        if !inserted {
            drop(slot);
            info!(
                "{} matches the signature of {}, reusing it",
                request.hostname,
                server.name()
            );
            // Covers Suspended and a login still in flight alike; a live
            // session makes this a no-op.
            server.resume().await?;
            return Ok(server);
        }

        match open_and_login(address, version, uam, &server.credentials).await {
            Ok(session) => {
                slot.session = Some(session);
                slot.phase = Phase::Authenticated;
                drop(slot);
            }
            Err(e) => {
                slot.phase = Phase::Closed;
                drop(slot);
                self.remove(&server);
                return Err(e);
            }
        }

        info!(
            "connected to {} ({:?}, {})",
            server.name(),
            server.server_type,
            version.wire_name()
        );
        Ok(server)
    }

    /// Connect and open the requested volume, then its desktop database for
    /// icon queries (non-fatal when the server refuses).
    pub async fn mount(&self, request: &ConnectionRequest) -> Result<Arc<Volume>> {
        let server = self.connect(request).await?;
        let volume = Volume::open_with_flags(
            server,
            &request.volume,
            request.volume_password.as_deref(),
            request.volume_flags,
        )
        .await?;

        if let Err(e) = crate::volinfo::open_icon_channel(&volume).await {
            warn!("desktop database on {} unavailable: {}", request.volume, e);
        }

        let volume = Arc::new(volume);
        self.inner
            .lock()
            .unwrap()
            .volumes
            .insert(request.volume.clone(), volume.clone());
        Ok(volume)
    }

    pub fn volume(&self, name: &str) -> Option<Arc<Volume>> {
        self.inner.lock().unwrap().volumes.get(name).cloned()
    }

    /// Close one mounted volume and forget it.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        let volume = {
            let mut inner = self.inner.lock().unwrap();
            inner.volumes.remove(name)
        };
        match volume {
            Some(volume) => volume.close().await,
            None => Err(Error::Resolve(format!("volume {} is not mounted", name))),
        }
    }

    pub fn find_server(&self, name: &str) -> Option<Arc<Server>> {
        let inner = self.inner.lock().unwrap();
        inner
            .servers
            .iter()
            .find(|s| s.name() == name || s.info.name == name)
            .cloned()
    }

    pub async fn suspend(&self, server_name: &str) -> Result<()> {
        match self.find_server(server_name) {
            Some(server) => server.suspend().await,
            None => Err(Error::Resolve(format!("no server named {}", server_name))),
        }
    }

    pub async fn resume(&self, server_name: &str) -> Result<()> {
        match self.find_server(server_name) {
            Some(server) => server.resume().await,
            None => Err(Error::Resolve(format!("no server named {}", server_name))),
        }
    }

    /// A text report of every server and volume, for the CLI.
    pub async fn status(&self) -> String {
        let (servers, volumes) = {
            let inner = self.inner.lock().unwrap();
            (inner.servers.clone(), inner.volumes.clone())
        };

        let mut out = String::new();
        for server in &servers {
            let phase = server.phase().await;
            let _ = writeln!(
                out,
                "server \"{}\" at {} ({:?}, {}): {:?}",
                server.name(),
                server.address,
                server.server_type,
                server.version.wire_name(),
                phase
            );
            for (name, volume) in &volumes {
                if Arc::ptr_eq(volume.server(), server) {
                    let _ = writeln!(out, "  volume \"{}\" id {}", name, volume.id());
                }
            }
        }
        if out.is_empty() {
            out.push_str("no servers connected\n");
        }
        out
    }

    /// Unmount everything, log out of every server, and close the sockets.
    pub async fn exit(&self) {
        let (servers, volumes) = {
            let mut inner = self.inner.lock().unwrap();
            (
                std::mem::take(&mut inner.servers),
                std::mem::take(&mut inner.volumes),
            )
        };
        for (name, volume) in volumes {
            if let Err(e) = volume.close().await {
                debug!("closing volume {} failed: {}", name, e);
            }
        }
        for server in servers {
            server.close().await;
        }
    }
}

async fn resolve(hostname: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((hostname, port))
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", hostname, e)))?;
    addrs
        .next()
        .ok_or_else(|| Error::Resolve(format!("{}: no addresses", hostname)))
}
