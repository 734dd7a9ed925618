//! Mounted volumes and the file operations scoped to them.

use {
    crate::{
        error::Error,
        ops::{self, SetParams, VolumeParams},
        proto::{
            AccessMode, AfpCommand, DirBitmap, FileBitmap, FileInfo, VolBitmap, VolumeFlags,
            DID_ROOT, K_FP_ACCESS_DENIED, K_FP_EOF_ERR,
        },
        server::Server,
        session::DsiSession,
        utils::Result,
        wire::PathKind,
    },
    log::{debug, info},
    std::sync::{Arc, Mutex as StdMutex},
};

/// An open data or resource fork.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fork {
    refnum: u16,
    resource: bool,
}

impl Fork {
    pub fn refnum(&self) -> u16 {
        self.refnum
    }

    pub fn is_resource(&self) -> bool {
        self.resource
    }
}

/// Which objects a parameter update may touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetTarget {
    File,
    Directory,
    Either,
}

impl SetTarget {
    fn command(self) -> AfpCommand {
        match self {
            SetTarget::File => AfpCommand::SetFileParms,
            SetTarget::Directory => AfpCommand::SetDirParms,
            SetTarget::Either => AfpCommand::SetFileDirParms,
        }
    }
}

/// One volume opened on a server. Never outlives its `Server`.
pub struct Volume {
    server: Arc<Server>,
    name: String,
    params: VolumeParams,
    flags: VolumeFlags,
    path_kind: PathKind,
    dt_ref: StdMutex<Option<u16>>,
}

impl Volume {
    /// FPOpenVol with the full parameter bitmap, optionally presenting the
    /// volume password.
    pub async fn open(
        server: Arc<Server>,
        name: &str,
        password: Option<&str>,
    ) -> Result<Volume> {
        Volume::open_with_flags(server, name, password, VolumeFlags::default()).await
    }

    pub async fn open_with_flags(
        server: Arc<Server>,
        name: &str,
        password: Option<&str>,
        flags: VolumeFlags,
    ) -> Result<Volume> {
        let bitmap = VolBitmap::all();
        let payload = ops::build_open_vol(bitmap, name, password)?;
        let session = server.session().await?;
        let reply = session.command(&payload).await?.check()?;
        let params = ops::parse_open_vol(&reply.body)?;

        info!("opened volume \"{}\" (id {})", name, params.vol_id);
        let path_kind = PathKind::for_version(server.version());
        Ok(Volume {
            server,
            name: name.to_string(),
            params,
            flags,
            path_kind,
            dt_ref: StdMutex::new(None),
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u16 {
        self.params.vol_id
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn flags(&self) -> VolumeFlags {
        self.flags
    }

    pub fn read_only(&self) -> bool {
        self.flags.contains(VolumeFlags::READ_ONLY)
    }

    /// The desktop-database refnum, once the icon channel is open.
    pub fn dt_ref(&self) -> Option<u16> {
        *self.dt_ref.lock().unwrap()
    }

    pub(crate) fn set_dt_ref(&self, refnum: u16) {
        *self.dt_ref.lock().unwrap() = Some(refnum);
    }

    async fn session(&self) -> Result<DsiSession> {
        self.server.session().await
    }

    fn writable(&self) -> Result<()> {
        if self.read_only() {
            return Err(Error::Afp(K_FP_ACCESS_DENIED));
        }
        Ok(())
    }

    /// Close the desktop database (when open) and the volume itself.
    pub async fn close(&self) -> Result<()> {
        let session = self.session().await?;
        let dt_ref = self.dt_ref.lock().unwrap().take();
        if let Some(dt_ref) = dt_ref {
            if let Err(e) = session.command(&ops::build_close_dt(dt_ref)).await {
                debug!("closing desktop database failed: {}", e);
            }
        }
        session
            .command(&ops::build_close_vol(self.id()))
            .await?
            .check()?;
        info!("closed volume \"{}\"", self.name);
        Ok(())
    }

    fn stat_bitmaps(&self) -> (FileBitmap, DirBitmap) {
        let mut file = FileBitmap::ATTRIBUTES
            | FileBitmap::PARENT_DIR_ID
            | FileBitmap::CREATE_DATE
            | FileBitmap::MOD_DATE
            | FileBitmap::BACKUP_DATE
            | FileBitmap::FINDER_INFO
            | FileBitmap::LONG_NAME
            | FileBitmap::NODE_ID
            | FileBitmap::EXT_DATA_FORK_LEN
            | FileBitmap::EXT_RSRC_FORK_LEN
            | FileBitmap::UNIX_PRIVS;
        let mut dir = DirBitmap::ATTRIBUTES
            | DirBitmap::PARENT_DIR_ID
            | DirBitmap::CREATE_DATE
            | DirBitmap::MOD_DATE
            | DirBitmap::BACKUP_DATE
            | DirBitmap::FINDER_INFO
            | DirBitmap::LONG_NAME
            | DirBitmap::NODE_ID
            | DirBitmap::OFFSPRING
            | DirBitmap::OWNER_ID
            | DirBitmap::GROUP_ID
            | DirBitmap::ACCESS_RIGHTS
            | DirBitmap::UNIX_PRIVS;
        if self.path_kind == PathKind::Utf8 {
            file |= FileBitmap::UTF8_NAME;
            dir |= DirBitmap::UTF8_NAME;
        }
        (file, dir)
    }

    /// FPGetFileDirParms for one path relative to the volume root.
    pub async fn stat(&self, did: u32, path: &str) -> Result<FileInfo> {
        let (file_bitmap, dir_bitmap) = self.stat_bitmaps();
        let payload = ops::build_get_file_dir_params(
            self.id(),
            did,
            file_bitmap,
            dir_bitmap,
            self.path_kind,
            path,
        )?;
        let reply = self.session().await?.command(&payload).await?.check()?;
        ops::parse_file_dir_params(&reply.body)
    }

    pub async fn stat_root(&self) -> Result<FileInfo> {
        self.stat(DID_ROOT, "").await
    }

    pub async fn create_file(&self, did: u32, path: &str, hard: bool) -> Result<()> {
        self.writable()?;
        let payload = ops::build_create_file(hard, self.id(), did, self.path_kind, path)?;
        self.session().await?.command(&payload).await?.check()?;
        Ok(())
    }

    pub async fn delete(&self, did: u32, path: &str) -> Result<()> {
        self.writable()?;
        let payload = ops::build_delete(self.id(), did, self.path_kind, path)?;
        self.session().await?.command(&payload).await?.check()?;
        Ok(())
    }

    /// Update file or directory parameters; the bitmap is derived from the
    /// fields actually present in `params`.
    pub async fn set_params(
        &self,
        did: u32,
        path: &str,
        target: SetTarget,
        params: &SetParams,
    ) -> Result<()> {
        self.writable()?;
        if params.is_empty() {
            return Ok(());
        }
        let payload = ops::build_set_params(
            target.command(),
            self.id(),
            did,
            self.path_kind,
            path,
            params,
        )?;
        self.session().await?.command(&payload).await?.check()?;
        Ok(())
    }

    pub async fn open_fork(
        &self,
        did: u32,
        path: &str,
        resource: bool,
        access: AccessMode,
    ) -> Result<Fork> {
        if access.intersects(AccessMode::WRITE) {
            self.writable()?;
        }
        let payload =
            ops::build_open_fork(resource, self.id(), did, access, self.path_kind, path)?;
        let reply = self.session().await?.command(&payload).await?.check()?;
        let refnum = ops::parse_open_fork(&reply.body)?;
        Ok(Fork { refnum, resource })
    }

    pub async fn close_fork(&self, fork: Fork) -> Result<()> {
        self.session()
            .await?
            .command(&ops::build_close_fork(fork.refnum))
            .await?
            .check()?;
        Ok(())
    }

    /// FPReadExt. The request is clamped to the session quantum; the reply
    /// may be short, and end-of-fork comes back with whatever data precedes
    /// it.
    pub async fn read(&self, fork: &Fork, offset: u64, len: u64) -> Result<Vec<u8>> {
        let session = self.session().await?;
        let len = len.min(session.rx_quantum() as u64);
        let reply = session.command(&ops::build_read_ext(fork.refnum, offset, len)).await?;
        match reply.result() {
            0 | K_FP_EOF_ERR => {
                let mut data = reply.body;
                if data.len() as u64 > len {
                    data.truncate(len as usize);
                }
                Ok(data)
            }
            code => Err(Error::Afp(code)),
        }
    }

    /// FPWriteExt; returns the number of bytes the server accepted.
    pub async fn write(&self, fork: &Fork, offset: u64, data: &[u8]) -> Result<u64> {
        self.writable()?;
        let payload = ops::build_write_ext(fork.refnum, offset, data);
        let reply = self
            .session()
            .await?
            .write_command(&payload, ops::WRITE_EXT_FIXED_LEN)
            .await?
            .check()?;
        let end = ops::parse_write_ext(&reply.body);
        Ok(end.saturating_sub(offset))
    }
}
