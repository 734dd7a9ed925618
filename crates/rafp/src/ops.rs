//! AFP operation payloads: a builder/parser pair per protocol command.
//!
//! Builders produce the DSICommand (or DSIWrite) payload for a request;
//! parsers consume the reply body. Both sides go through the checked
//! `wire` cursors, so a short or lying reply surfaces as an error instead
//! of reading past the buffer.

use {
    crate::{
        proto::{
            self, AccessMode, AfpCommand, AfpVersion, DirBitmap, FileBitmap, FileInfo,
            MapIdFunction, MapNameFunction, ServerInfo, UnixPrivs, UserInfoBitmap, VolBitmap,
            SERVER_ICON_LEN, SIGNATURE_LEN,
        },
        utils::Result,
        wire::{PathKind, Reader, Writer},
    },
    log::warn,
};

/// Longest name the mapping replies may carry.
const MAP_NAME_CAP: usize = 255;

fn header(w: &mut Writer, command: AfpCommand) -> &mut Writer {
    w.u8(command as u8).u8(0)
}

// ---------------------------------------------------------------------------
// Login and logout
// ---------------------------------------------------------------------------

/// FPLogin: AFP version and UAM names, then the UAM-specific tail built by
/// the authenticator.
pub fn build_login(version: AfpVersion, uam: &str, tail: &[u8]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u8(AfpCommand::Login as u8);
    w.pascal(version.wire_name())?;
    w.pascal(uam)?;
    w.bytes(tail);
    Ok(w.into_vec())
}

/// FPLogin with the "Cleartxt Passwrd" UAM. The username is padded so the
/// fixed 8 byte password block starts on an even boundary of the whole
/// request, which the version and UAM strings may have left odd.
pub fn build_login_cleartext(
    version: AfpVersion,
    uam: &str,
    username: &str,
    password: &str,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u8(AfpCommand::Login as u8);
    w.pascal(version.wire_name())?;
    w.pascal(uam)?;
    w.pascal(username)?;
    w.align_even();
    let mut block = [0u8; proto::CLEARTEXT_PASSWORD_LEN];
    let bytes = password.as_bytes();
    let n = bytes.len().min(proto::CLEARTEXT_PASSWORD_LEN);
    block[..n].copy_from_slice(&bytes[..n]);
    w.bytes(&block);
    Ok(w.into_vec())
}

/// FPLoginCont: continuation id echoed back with the next auth stage.
pub fn build_login_cont(id: u16, tail: &[u8]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::LoginCont).u16(id).bytes(tail);
    Ok(w.into_vec())
}

/// An `kFPAuthContinue` reply: the continuation id plus the server's
/// challenge material, clamped to what the UAM can accept.
pub fn parse_auth_continue(body: &[u8], cap: usize) -> Result<(u16, Vec<u8>)> {
    let mut r = Reader::new(body);
    let id = r.u16()?;
    let mut challenge = r.bytes(r.remaining())?.to_vec();
    if challenge.len() > cap {
        warn!("auth continue carries {} bytes, clamping to {}", challenge.len(), cap);
        challenge.truncate(cap);
    }
    Ok((id, challenge))
}

pub fn build_logout() -> Vec<u8> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::Logout);
    w.into_vec()
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

/// Parsed FPOpenVol reply parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeParams {
    pub attributes: u16,
    pub signature: u16,
    pub creation_date: i64,
    pub modification_date: i64,
    pub backup_date: i64,
    pub vol_id: u16,
    pub bytes_free: u32,
    pub bytes_total: u32,
    pub name: String,
}

pub fn build_open_vol(
    bitmap: VolBitmap,
    volume_name: &str,
    password: Option<&str>,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::OpenVol).u16(bitmap.bits());
    w.pascal(volume_name)?;
    if let Some(password) = password {
        w.align_even();
        let mut block = [0u8; proto::VOL_PASSWORD_LEN];
        let bytes = password.as_bytes();
        let n = bytes.len().min(proto::VOL_PASSWORD_LEN);
        block[..n].copy_from_slice(&bytes[..n]);
        w.bytes(&block);
    }
    Ok(w.into_vec())
}

/// Fields arrive in ascending bitmap-bit order; only requested bits are
/// present.
pub fn parse_open_vol(body: &[u8]) -> Result<VolumeParams> {
    let mut r = Reader::new(body);
    let bitmap = VolBitmap::from_bits_truncate(r.u16()?);
    let mut params = VolumeParams::default();

    if bitmap.contains(VolBitmap::ATTRIBUTES) {
        params.attributes = r.u16()?;
    }
    if bitmap.contains(VolBitmap::SIGNATURE) {
        params.signature = r.u16()?;
    }
    if bitmap.contains(VolBitmap::CREATE_DATE) {
        params.creation_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(VolBitmap::MOD_DATE) {
        params.modification_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(VolBitmap::BACKUP_DATE) {
        params.backup_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(VolBitmap::VOL_ID) {
        params.vol_id = r.u16()?;
    }
    if bitmap.contains(VolBitmap::BYTES_FREE) {
        params.bytes_free = r.u32()?;
    }
    if bitmap.contains(VolBitmap::BYTES_TOTAL) {
        params.bytes_total = r.u32()?;
    }
    if bitmap.contains(VolBitmap::NAME) {
        params.name = r.pascal_clamped(255)?;
    }
    Ok(params)
}

pub fn build_close_vol(vol_id: u16) -> Vec<u8> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::CloseVol).u16(vol_id);
    w.into_vec()
}

// ---------------------------------------------------------------------------
// Forks
// ---------------------------------------------------------------------------

pub fn build_open_fork(
    resource: bool,
    vol_id: u16,
    did: u32,
    access: AccessMode,
    kind: PathKind,
    path: &str,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u8(AfpCommand::OpenFork as u8)
        .u8(if resource { proto::FORK_RSRC } else { proto::FORK_DATA })
        .u16(vol_id)
        .u32(did)
        .u16(0) // no parameters requested back
        .u16(access.bits());
    w.path(kind, path)?;
    Ok(w.into_vec())
}

/// Reply carries the echoed bitmap then the fork reference number.
pub fn parse_open_fork(body: &[u8]) -> Result<u16> {
    let mut r = Reader::new(body);
    let _bitmap = r.u16()?;
    r.u16()
}

pub fn build_close_fork(fork: u16) -> Vec<u8> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::CloseFork).u16(fork);
    w.into_vec()
}

// ---------------------------------------------------------------------------
// File and directory parameters
// ---------------------------------------------------------------------------

pub fn build_get_file_dir_params(
    vol_id: u16,
    did: u32,
    file_bitmap: FileBitmap,
    dir_bitmap: DirBitmap,
    kind: PathKind,
    path: &str,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::GetFileDirParms)
        .u16(vol_id)
        .u32(did)
        .u16(file_bitmap.bits())
        .u16(dir_bitmap.bits());
    w.path(kind, path)?;
    Ok(w.into_vec())
}

/// Decode one FPGetFileDirParms reply into a `FileInfo`. The reply echoes
/// both bitmaps, flags whether the object is a directory, and packs the
/// parameter block after a pad byte; names live behind offsets into that
/// block.
pub fn parse_file_dir_params(body: &[u8]) -> Result<FileInfo> {
    let mut r = Reader::new(body);
    let file_bitmap = FileBitmap::from_bits_truncate(r.u16()?);
    let dir_bitmap = DirBitmap::from_bits_truncate(r.u16()?);
    let is_dir = r.u8()? & 0x80 != 0;
    r.skip(1)?;

    let block = r.bytes(r.remaining())?;
    if is_dir {
        parse_dir_block(block, dir_bitmap)
    } else {
        parse_file_block(block, file_bitmap)
    }
}

fn read_unix_privs(r: &mut Reader) -> Result<UnixPrivs> {
    Ok(UnixPrivs {
        uid: r.u32()?,
        gid: r.u32()?,
        permissions: r.u32()?,
        ua_permissions: r.u32()?,
    })
}

/// A long name is stored behind a u16 offset into the parameter block.
fn read_long_name(block: &[u8], r: &mut Reader) -> Result<String> {
    let offset = r.u16()? as usize;
    Reader::new(block).at(offset)?.pascal_clamped(255)
}

/// A UTF-8 name field is a u16 offset plus a 4 byte pad; at the offset sit
/// a text-encoding hint, a u16 length, and the bytes.
fn read_utf8_name(block: &[u8], r: &mut Reader) -> Result<String> {
    let offset = r.u16()? as usize;
    r.skip(4)?;
    let mut name = Reader::new(block).at(offset)?;
    let _hint = name.u32()?;
    let len = name.u16()? as usize;
    let bytes = name.bytes(len.min(name.remaining()))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn parse_file_block(block: &[u8], bitmap: FileBitmap) -> Result<FileInfo> {
    let mut info = FileInfo {
        is_dir: false,
        ..FileInfo::default()
    };
    let mut r = Reader::new(block);
    let mut long_name = None;
    let mut utf8_name = None;

    if bitmap.contains(FileBitmap::ATTRIBUTES) {
        info.attributes = r.u16()?;
    }
    if bitmap.contains(FileBitmap::PARENT_DIR_ID) {
        info.parent_did = r.u32()?;
    }
    if bitmap.contains(FileBitmap::CREATE_DATE) {
        info.creation_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(FileBitmap::MOD_DATE) {
        info.modification_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(FileBitmap::BACKUP_DATE) {
        info.backup_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(FileBitmap::FINDER_INFO) {
        info.finder_info.copy_from_slice(r.bytes(32)?);
    }
    if bitmap.contains(FileBitmap::LONG_NAME) {
        long_name = Some(read_long_name(block, &mut r)?);
    }
    if bitmap.contains(FileBitmap::SHORT_NAME) {
        r.skip(2)?;
    }
    if bitmap.contains(FileBitmap::NODE_ID) {
        info.node_id = r.u32()?;
    }
    if bitmap.contains(FileBitmap::DATA_FORK_LEN) {
        info.size = r.u32()? as u64;
    }
    if bitmap.contains(FileBitmap::RSRC_FORK_LEN) {
        info.resource_size = r.u32()? as u64;
    }
    if bitmap.contains(FileBitmap::EXT_DATA_FORK_LEN) {
        info.size = r.u64()?;
    }
    if bitmap.contains(FileBitmap::LAUNCH_LIMIT) {
        r.skip(2)?;
    }
    if bitmap.contains(FileBitmap::UTF8_NAME) {
        utf8_name = Some(read_utf8_name(block, &mut r)?);
    }
    if bitmap.contains(FileBitmap::EXT_RSRC_FORK_LEN) {
        info.resource_size = r.u64()?;
    }
    if bitmap.contains(FileBitmap::UNIX_PRIVS) {
        info.unix_privs = read_unix_privs(&mut r)?;
    }

    // A UTF-8 name wins over the 31 character long name when both came back.
    info.name = utf8_name.or(long_name).unwrap_or_default();
    Ok(info)
}

fn parse_dir_block(block: &[u8], bitmap: DirBitmap) -> Result<FileInfo> {
    let mut info = FileInfo {
        is_dir: true,
        ..FileInfo::default()
    };
    let mut r = Reader::new(block);
    let mut long_name = None;
    let mut utf8_name = None;

    if bitmap.contains(DirBitmap::ATTRIBUTES) {
        info.attributes = r.u16()?;
    }
    if bitmap.contains(DirBitmap::PARENT_DIR_ID) {
        info.parent_did = r.u32()?;
    }
    if bitmap.contains(DirBitmap::CREATE_DATE) {
        info.creation_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(DirBitmap::MOD_DATE) {
        info.modification_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(DirBitmap::BACKUP_DATE) {
        info.backup_date = proto::date_from_wire(r.u32()?);
    }
    if bitmap.contains(DirBitmap::FINDER_INFO) {
        info.finder_info.copy_from_slice(r.bytes(32)?);
    }
    if bitmap.contains(DirBitmap::LONG_NAME) {
        long_name = Some(read_long_name(block, &mut r)?);
    }
    if bitmap.contains(DirBitmap::SHORT_NAME) {
        r.skip(2)?;
    }
    if bitmap.contains(DirBitmap::NODE_ID) {
        info.node_id = r.u32()?;
    }
    if bitmap.contains(DirBitmap::OFFSPRING) {
        info.offspring_count = r.u16()?;
    }
    if bitmap.contains(DirBitmap::OWNER_ID) {
        info.owner_id = r.u32()?;
    }
    if bitmap.contains(DirBitmap::GROUP_ID) {
        info.group_id = r.u32()?;
    }
    if bitmap.contains(DirBitmap::ACCESS_RIGHTS) {
        info.access_rights = r.u32()?;
    }
    if bitmap.contains(DirBitmap::UTF8_NAME) {
        utf8_name = Some(read_utf8_name(block, &mut r)?);
    }
    if bitmap.contains(DirBitmap::UNIX_PRIVS) {
        info.unix_privs = read_unix_privs(&mut r)?;
    }

    info.name = utf8_name.or(long_name).unwrap_or_default();
    Ok(info)
}

/// The settable subset of file/directory parameters. The request bitmap is
/// derived from exactly the fields that are present.
#[derive(Clone, Debug, Default)]
pub struct SetParams {
    pub attributes: Option<u16>,
    pub creation_date: Option<i64>,
    pub modification_date: Option<i64>,
    pub backup_date: Option<i64>,
    pub finder_info: Option<[u8; 32]>,
    pub unix_privs: Option<UnixPrivs>,
}

impl SetParams {
    pub fn is_empty(&self) -> bool {
        self.bitmap() == 0
    }

    /// File and directory bitmaps agree on every settable bit.
    pub fn bitmap(&self) -> u16 {
        let mut bits = 0;
        if self.attributes.is_some() {
            bits |= FileBitmap::ATTRIBUTES.bits();
        }
        if self.creation_date.is_some() {
            bits |= FileBitmap::CREATE_DATE.bits();
        }
        if self.modification_date.is_some() {
            bits |= FileBitmap::MOD_DATE.bits();
        }
        if self.backup_date.is_some() {
            bits |= FileBitmap::BACKUP_DATE.bits();
        }
        if self.finder_info.is_some() {
            bits |= FileBitmap::FINDER_INFO.bits();
        }
        if self.unix_privs.is_some() {
            bits |= FileBitmap::UNIX_PRIVS.bits();
        }
        bits
    }
}

/// One builder serves FPSetFileParms, FPSetDirParms, and FPSetFileDirParms;
/// they differ only in the command byte and which bitmap bits the server
/// will accept. Parameters are packed in ascending bit order after the path
/// is padded to an even boundary.
pub fn build_set_params(
    command: AfpCommand,
    vol_id: u16,
    did: u32,
    kind: PathKind,
    path: &str,
    params: &SetParams,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    header(&mut w, command)
        .u16(vol_id)
        .u32(did)
        .u16(params.bitmap());
    w.path(kind, path)?;
    w.align_even();

    if let Some(attributes) = params.attributes {
        w.u16(attributes);
    }
    if let Some(date) = params.creation_date {
        w.u32(proto::date_to_wire(date));
    }
    if let Some(date) = params.modification_date {
        w.u32(proto::date_to_wire(date));
    }
    if let Some(date) = params.backup_date {
        w.u32(proto::date_to_wire(date));
    }
    if let Some(finder_info) = params.finder_info {
        w.bytes(&finder_info);
    }
    if let Some(privs) = params.unix_privs {
        w.u32(privs.uid)
            .u32(privs.gid)
            .u32(privs.permissions)
            .u32(privs.ua_permissions);
    }
    Ok(w.into_vec())
}

// ---------------------------------------------------------------------------
// Create, delete
// ---------------------------------------------------------------------------

pub fn build_create_file(
    hard: bool,
    vol_id: u16,
    did: u32,
    kind: PathKind,
    path: &str,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u8(AfpCommand::CreateFile as u8)
        .u8(if hard { proto::CREATE_HARD } else { proto::CREATE_SOFT })
        .u16(vol_id)
        .u32(did);
    w.path(kind, path)?;
    Ok(w.into_vec())
}

pub fn build_delete(vol_id: u16, did: u32, kind: PathKind, path: &str) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    header(&mut w, AfpCommand::Delete).u16(vol_id).u32(did);
    w.path(kind, path)?;
    Ok(w.into_vec())
}

// ---------------------------------------------------------------------------
// Extended read and write
// ---------------------------------------------------------------------------

pub fn build_read_ext(fork: u16, offset: u64, len: u64) -> Vec<u8> {
    let mut w = Writer::with_capacity(20);
    header(&mut w, AfpCommand::ReadExt)
        .u16(fork)
        .u64(offset)
        .u64(len);
    w.into_vec()
}

/// Fixed region of an FPWriteExt request; the DSI data offset in the header
/// dword points just past it.
pub const WRITE_EXT_FIXED_LEN: u32 = 20;

pub fn build_write_ext(fork: u16, offset: u64, data: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(WRITE_EXT_FIXED_LEN as usize + data.len());
    w.u8(AfpCommand::WriteExt as u8)
        .u8(0) // offsets are from the start of the fork
        .u16(fork)
        .u64(offset)
        .u64(data.len() as u64)
        .bytes(data);
    w.into_vec()
}

/// FPWriteExt replies with the offset past the last written byte; an
/// undersized reply counts as zero.
pub fn parse_write_ext(body: &[u8]) -> u64 {
    let mut r = Reader::new(body);
    r.u64().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Identity mapping
// ---------------------------------------------------------------------------

pub fn build_map_id(function: MapIdFunction, id: u32) -> Vec<u8> {
    let mut w = Writer::with_capacity(6);
    w.u8(AfpCommand::MapId as u8).u8(function as u8).u32(id);
    w.into_vec()
}

pub fn parse_map_id(body: &[u8]) -> Result<String> {
    Reader::new(body).pascal_clamped(MAP_NAME_CAP)
}

pub fn build_map_name(function: MapNameFunction, name: &str) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.u8(AfpCommand::MapName as u8).u8(function as u8);
    w.pascal(name)?;
    Ok(w.into_vec())
}

pub fn parse_map_name(body: &[u8]) -> Result<u32> {
    Reader::new(body).u32()
}

/// Resolved ids for the logged-in user; a clear reply bit leaves the field
/// unset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfoReply {
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
}

const GET_USER_INFO_THIS_USER: u8 = 0x01;

pub fn build_get_user_info(bitmap: UserInfoBitmap) -> Vec<u8> {
    let mut w = Writer::with_capacity(8);
    w.u8(AfpCommand::GetUserInfo as u8)
        .u8(GET_USER_INFO_THIS_USER)
        .u32(0)
        .u16(bitmap.bits());
    w.into_vec()
}

/// Each output is gated on its own reply bit, independent of the other.
pub fn parse_get_user_info(body: &[u8]) -> Result<UserInfoReply> {
    let mut r = Reader::new(body);
    let bitmap = UserInfoBitmap::from_bits_truncate(r.u16()?);
    let mut reply = UserInfoReply::default();
    if bitmap.contains(UserInfoBitmap::USER_ID) {
        reply.user_id = Some(r.u32()?);
    }
    if bitmap.contains(UserInfoBitmap::PRI_GROUP_ID) {
        reply.group_id = Some(r.u32()?);
    }
    Ok(reply)
}

// ---------------------------------------------------------------------------
// Desktop database and icons
// ---------------------------------------------------------------------------

pub fn build_open_dt(vol_id: u16) -> Vec<u8> {
    let mut w = Writer::with_capacity(4);
    header(&mut w, AfpCommand::OpenDt).u16(vol_id);
    w.into_vec()
}

pub fn parse_open_dt(body: &[u8]) -> Result<u16> {
    Reader::new(body).u16()
}

pub fn build_close_dt(dt_ref: u16) -> Vec<u8> {
    let mut w = Writer::with_capacity(4);
    header(&mut w, AfpCommand::CloseDt).u16(dt_ref);
    w.into_vec()
}

pub fn build_get_icon(
    dt_ref: u16,
    creator: [u8; 4],
    file_type: [u8; 4],
    icon_type: u8,
    length: u16,
) -> Vec<u8> {
    let mut w = Writer::with_capacity(16);
    header(&mut w, AfpCommand::GetIcon)
        .u16(dt_ref)
        .bytes(&creator)
        .bytes(&file_type)
        .u8(icon_type)
        .u8(0)
        .u16(length);
    w.into_vec()
}

// ---------------------------------------------------------------------------
// Server info (the GetStatus probe reply)
// ---------------------------------------------------------------------------

fn read_name_list(block: &[u8], offset: usize) -> Result<Vec<String>> {
    let mut r = Reader::new(block).at(offset)?;
    let count = r.u8()? as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(r.pascal_clamped(255)?);
    }
    Ok(names)
}

/// Decode the FPGetSrvrInfo block: a table of u16 offsets up front, the
/// flag word deciding which trailing offsets exist at all.
pub fn parse_server_info(body: &[u8]) -> Result<ServerInfo> {
    let mut r = Reader::new(body);
    let machine_offset = r.u16()? as usize;
    let versions_offset = r.u16()? as usize;
    let uams_offset = r.u16()? as usize;
    let icon_offset = r.u16()? as usize;
    let flags = r.u16()?;
    let name = r.pascal_clamped(255)?;
    r.skip_to_even()?;

    let mut signature_offset = 0;
    let mut utf8_name_offset = 0;
    if flags & proto::SRVRINFO_SUPPORTS_SRVR_SIG != 0 {
        signature_offset = r.u16()? as usize;
    }
    if flags & proto::SRVRINFO_SUPPORTS_TCP != 0 {
        let _network_addresses_offset = r.u16()?;
    }
    if flags & proto::SRVRINFO_SUPPORTS_DIR_SERVICES != 0 {
        let _directory_names_offset = r.u16()?;
    }
    if flags & proto::SRVRINFO_SUPPORTS_UTF8_NAME != 0 {
        utf8_name_offset = r.u16()? as usize;
    }

    let machine_type = Reader::new(body).at(machine_offset)?.pascal_clamped(255)?;
    let versions = read_name_list(body, versions_offset)?;
    let uams = read_name_list(body, uams_offset)?;

    let signature = if signature_offset != 0 {
        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(Reader::new(body).at(signature_offset)?.bytes(SIGNATURE_LEN)?);
        Some(sig)
    } else {
        None
    };

    let utf8_name = if utf8_name_offset != 0 {
        let mut r = Reader::new(body).at(utf8_name_offset)?;
        let len = r.u16()? as usize;
        String::from_utf8_lossy(r.bytes(len.min(r.remaining()))?).into_owned()
    } else {
        String::new()
    };

    let icon = if icon_offset != 0 {
        let mut r = Reader::new(body).at(icon_offset)?;
        if r.remaining() >= SERVER_ICON_LEN {
            Some(r.bytes(SERVER_ICON_LEN)?.to_vec())
        } else {
            None
        }
    } else {
        None
    };

    Ok(ServerInfo {
        machine_type,
        versions,
        uams,
        flags,
        name,
        utf8_name,
        signature,
        icon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_vol_reply_fields_follow_bit_order() {
        let mut w = Writer::new();
        let bitmap = VolBitmap::VOL_ID | VolBitmap::BYTES_FREE | VolBitmap::NAME;
        w.u16(bitmap.bits()).u16(7).u32(1000);
        w.pascal("Media").unwrap();
        let params = parse_open_vol(&w.into_vec()).unwrap();
        assert_eq!(params.vol_id, 7);
        assert_eq!(params.bytes_free, 1000);
        assert_eq!(params.name, "Media");
        assert_eq!(params.bytes_total, 0);
    }

    #[test]
    fn file_params_reply_resolves_utf8_name_offset() {
        // Parameter block: node id, then the UTF-8 name entry pointing past
        // the fixed fields.
        let bitmap = FileBitmap::NODE_ID | FileBitmap::UTF8_NAME;
        let mut w = Writer::new();
        w.u16(bitmap.bits())
            .u16(0)
            .u8(0) // a file
            .u8(0);
        // block starts here: node id (4) + offset (2) + pad (4) = 10
        w.u32(42).u16(10).u32(0);
        w.u32(crate::wire::UTF8_TEXT_ENCODING)
            .u16(5)
            .bytes(b"notes");
        let info = parse_file_dir_params(&w.into_vec()).unwrap();
        assert!(!info.is_dir);
        assert_eq!(info.node_id, 42);
        assert_eq!(info.name, "notes");
    }

    #[test]
    fn dir_params_reply_gates_owner_and_rights() {
        let bitmap = DirBitmap::OFFSPRING | DirBitmap::OWNER_ID | DirBitmap::ACCESS_RIGHTS;
        let mut w = Writer::new();
        w.u16(0).u16(bitmap.bits()).u8(0x80).u8(0);
        w.u16(3).u32(501).u32(0x0007_0007);
        let info = parse_file_dir_params(&w.into_vec()).unwrap();
        assert!(info.is_dir);
        assert_eq!(info.offspring_count, 3);
        assert_eq!(info.owner_id, 501);
        assert_eq!(info.group_id, 0);
        assert_eq!(info.access_rights, 0x0007_0007);
    }

    #[test]
    fn set_params_packs_canonical_order() {
        let params = SetParams {
            modification_date: Some(proto::date_from_wire(0x0102_0304)),
            unix_privs: Some(UnixPrivs {
                uid: 1,
                gid: 2,
                permissions: 0o644,
                ua_permissions: 0,
            }),
            ..SetParams::default()
        };
        let payload = build_set_params(
            AfpCommand::SetFileDirParms,
            5,
            proto::DID_ROOT,
            PathKind::Long,
            "a",
            &params,
        )
        .unwrap();

        // cmd, pad, vol, did, bitmap, path(2 + 1 + 1), pad to even, then
        // mod date directly before the unix privs block.
        assert_eq!(payload[0], AfpCommand::SetFileDirParms as u8);
        let bitmap = u16::from_be_bytes([payload[8], payload[9]]);
        assert_eq!(
            bitmap,
            (FileBitmap::MOD_DATE | FileBitmap::UNIX_PRIVS).bits()
        );
        let tail = &payload[14..];
        assert_eq!(&tail[..4], &0x0102_0304u32.to_be_bytes());
        assert_eq!(&tail[4..8], &1u32.to_be_bytes());
        assert_eq!(tail.len(), 4 + 16);
    }

    #[test]
    fn write_ext_fixed_region_is_twenty_bytes() {
        let payload = build_write_ext(9, 0x10, b"hello");
        assert_eq!(payload.len(), WRITE_EXT_FIXED_LEN as usize + 5);
        assert_eq!(payload[0], AfpCommand::WriteExt as u8);
        assert_eq!(&payload[4..12], &0x10u64.to_be_bytes());
        assert_eq!(&payload[12..20], &5u64.to_be_bytes());
        assert_eq!(&payload[20..], b"hello");
    }

    #[test]
    fn write_ext_short_reply_counts_as_zero() {
        assert_eq!(parse_write_ext(&[0, 1, 2]), 0);
        assert_eq!(parse_write_ext(&25u64.to_be_bytes()), 25);
    }

    #[test]
    fn cleartext_password_starts_on_an_even_request_boundary() {
        // "AFP3.2" and "Cleartxt Passwrd" leave the prefix at 25 bytes, so
        // the parity of the pad depends on the whole request, not just the
        // username.
        let payload =
            build_login_cleartext(AfpVersion::V32, "Cleartxt Passwrd", "bob", "pw").unwrap();
        assert_eq!(payload.len(), 25 + 4 + 1 + 8);
        assert_eq!(&payload[30..32], b"pw");

        let payload =
            build_login_cleartext(AfpVersion::V32, "Cleartxt Passwrd", "amanda", "s3cret")
                .unwrap();
        assert_eq!(payload.len(), 25 + 7 + 8);
        assert_eq!(&payload[32..38], b"s3cret");
    }

    #[test]
    fn auth_continue_clamps_oversized_challenges() {
        let mut body = vec![0x00, 0x07];
        body.extend_from_slice(&[0x5a; 64]);
        let (id, challenge) = parse_auth_continue(&body, 16).unwrap();
        assert_eq!(id, 7);
        assert_eq!(challenge.len(), 16);

        let cont = build_login_cont(id, &challenge).unwrap();
        assert_eq!(cont[0], AfpCommand::LoginCont as u8);
        assert_eq!(u16::from_be_bytes([cont[2], cont[3]]), 7);
        assert_eq!(cont.len(), 4 + 16);
    }

    #[test]
    fn user_info_outputs_are_independently_gated() {
        let mut w = Writer::new();
        w.u16(UserInfoBitmap::PRI_GROUP_ID.bits()).u32(20);
        let reply = parse_get_user_info(&w.into_vec()).unwrap();
        assert_eq!(reply.user_id, None);
        assert_eq!(reply.group_id, Some(20));
    }

    #[test]
    fn server_info_block_round_trip() {
        // Offsets are filled in by hand; the block mirrors what netatalk
        // sends for a signed, UTF-8 capable server.
        let flags = proto::SRVRINFO_SUPPORTS_SRVR_SIG | proto::SRVRINFO_SUPPORTS_UTF8_NAME;
        let mut w = Writer::new();
        // fixed part: 4 offsets + flags + name "srv" + pad + 2 gated offsets
        // = 8 + 2 + 4 + 2 + 2 = 18 bytes
        let machine_offset = 18u16;
        let versions_offset = machine_offset + 1 + 8;
        let uams_offset = versions_offset + 1 + 1 + 6;
        let signature_offset = uams_offset + 1 + 1 + 16;
        let utf8_offset = signature_offset + 16;
        w.u16(machine_offset)
            .u16(versions_offset)
            .u16(uams_offset)
            .u16(0)
            .u16(flags);
        w.pascal("srv").unwrap();
        w.u16(signature_offset).u16(utf8_offset);
        w.pascal("Netatalk").unwrap();
        w.u8(1);
        w.pascal("AFP3.2").unwrap();
        w.u8(1);
        w.pascal("Cleartxt Passwrd").unwrap();
        w.bytes(&[0xaa; 16]);
        let utf8 = "srüv".as_bytes();
        w.u16(utf8.len() as u16).bytes(utf8);

        let info = parse_server_info(&w.into_vec()).unwrap();
        assert_eq!(info.name, "srv");
        assert_eq!(info.machine_type, "Netatalk");
        assert_eq!(info.versions, vec!["AFP3.2".to_string()]);
        assert_eq!(info.uams, vec!["Cleartxt Passwrd".to_string()]);
        assert_eq!(info.signature, Some([0xaa; 16]));
        assert_eq!(info.utf8_name, "srüv");
        assert_eq!(info.icon, None);
    }
}
