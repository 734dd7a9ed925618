//! AFP protocol data types and constants.
//!
//! # Protocol
//! AFP 2.2 / 3.x over DSI

use bitflags::bitflags;
use enum_primitive::*;

/// Default TCP port for AFP over DSI
pub const AFP_PORT: u16 = 548;

/// Length of a server signature
pub const SIGNATURE_LEN: usize = 16;

/// Fixed size of a server/volume icon bitmap
pub const SERVER_ICON_LEN: usize = 256;

/// Cleartext passwords occupy a fixed eight byte field on the wire
pub const CLEARTEXT_PASSWORD_LEN: usize = 8;

/// Volume passwords occupy a fixed eight byte field on the wire
pub const VOL_PASSWORD_LEN: usize = 8;

/// Root directory id of every volume
pub const DID_ROOT: u32 = 2;

enum_from_primitive! {
    #[doc = "AFP command bytes"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum AfpCommand {
        CloseVol        = 2,
        CloseFork       = 4,
        CreateFile      = 7,
        Delete          = 8,
        GetSrvrInfo     = 15,
        Login           = 18,
        LoginCont       = 19,
        Logout          = 20,
        MapId           = 21,
        MapName         = 22,
        OpenVol         = 24,
        OpenFork        = 26,
        SetDirParms     = 29,
        SetFileParms    = 30,
        GetFileDirParms = 34,
        SetFileDirParms = 35,
        GetUserInfo     = 37,
        OpenDt          = 48,
        CloseDt         = 49,
        GetIcon         = 51,
        ReadExt         = 60,
        WriteExt        = 61,
    }
}

/*
 * AFP result codes (negative, returned in the DSI header of replies)
 */
pub const K_FP_NO_ERR: i32 = 0;
pub const K_FP_ACCESS_DENIED: i32 = -5000;
pub const K_FP_AUTH_CONTINUE: i32 = -5001;
pub const K_FP_BAD_UAM: i32 = -5002;
pub const K_FP_BAD_VERS_NUM: i32 = -5003;
pub const K_FP_EOF_ERR: i32 = -5009;
pub const K_FP_ITEM_NOT_FOUND: i32 = -5012;
pub const K_FP_MISC_ERR: i32 = -5014;
pub const K_FP_OBJECT_EXISTS: i32 = -5017;
pub const K_FP_OBJECT_NOT_FOUND: i32 = -5018;
pub const K_FP_PARAM_ERR: i32 = -5019;
pub const K_FP_USER_NOT_AUTH: i32 = -5023;
pub const K_FP_CALL_NOT_SUPPORTED: i32 = -5024;
pub const K_FP_PWD_EXPIRED_ERR: i32 = -5042;

/// Human readable name for an AFP result code.
pub fn strerror(code: i32) -> &'static str {
    match code {
        K_FP_NO_ERR => "no error",
        K_FP_ACCESS_DENIED => "access denied",
        K_FP_AUTH_CONTINUE => "authentication continues",
        K_FP_BAD_UAM => "UAM unknown to the server",
        K_FP_BAD_VERS_NUM => "AFP version unknown to the server",
        K_FP_EOF_ERR => "end of fork",
        K_FP_ITEM_NOT_FOUND => "item not found",
        K_FP_MISC_ERR => "miscellaneous server error",
        K_FP_OBJECT_EXISTS => "object already exists",
        K_FP_OBJECT_NOT_FOUND => "object not found",
        K_FP_PARAM_ERR => "parameter error",
        K_FP_USER_NOT_AUTH => "user not authenticated",
        K_FP_CALL_NOT_SUPPORTED => "call not supported",
        K_FP_PWD_EXPIRED_ERR => "password expired",
        _ => "unrecognized AFP error",
    }
}

/*
 * AFP dates count seconds from 2000-01-01 00:00:00 UTC, signed 32-bit.
 */
const AFP_DATE_EPOCH: i64 = 946_684_800;

pub fn date_to_wire(unix_secs: i64) -> u32 {
    (unix_secs - AFP_DATE_EPOCH) as i32 as u32
}

pub fn date_from_wire(wire: u32) -> i64 {
    wire as i32 as i64 + AFP_DATE_EPOCH
}

bitflags! {
    /// File bitmap bits for `FPGetFileDirParms`/`FPSetFileParms`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct FileBitmap: u16 {
        const ATTRIBUTES        = 0x0001;
        const PARENT_DIR_ID     = 0x0002;
        const CREATE_DATE       = 0x0004;
        const MOD_DATE          = 0x0008;
        const BACKUP_DATE       = 0x0010;
        const FINDER_INFO       = 0x0020;
        const LONG_NAME         = 0x0040;
        const SHORT_NAME        = 0x0080;
        const NODE_ID           = 0x0100;
        const DATA_FORK_LEN     = 0x0200;
        const RSRC_FORK_LEN     = 0x0400;
        const EXT_DATA_FORK_LEN = 0x0800;
        const LAUNCH_LIMIT      = 0x1000;
        const UTF8_NAME         = 0x2000;
        const EXT_RSRC_FORK_LEN = 0x4000;
        const UNIX_PRIVS        = 0x8000;
    }
}

bitflags! {
    /// Directory bitmap bits for `FPGetFileDirParms`/`FPSetDirParms`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct DirBitmap: u16 {
        const ATTRIBUTES    = 0x0001;
        const PARENT_DIR_ID = 0x0002;
        const CREATE_DATE   = 0x0004;
        const MOD_DATE      = 0x0008;
        const BACKUP_DATE   = 0x0010;
        const FINDER_INFO   = 0x0020;
        const LONG_NAME     = 0x0040;
        const SHORT_NAME    = 0x0080;
        const NODE_ID       = 0x0100;
        const OFFSPRING     = 0x0200;
        const OWNER_ID      = 0x0400;
        const GROUP_ID      = 0x0800;
        const ACCESS_RIGHTS = 0x1000;
        const UTF8_NAME     = 0x2000;
        const UNIX_PRIVS    = 0x8000;
    }
}

bitflags! {
    /// Volume bitmap bits for `FPOpenVol`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct VolBitmap: u16 {
        const ATTRIBUTES  = 0x0001;
        const SIGNATURE   = 0x0002;
        const CREATE_DATE = 0x0004;
        const MOD_DATE    = 0x0008;
        const BACKUP_DATE = 0x0010;
        const VOL_ID      = 0x0020;
        const BYTES_FREE  = 0x0040;
        const BYTES_TOTAL = 0x0080;
        const NAME        = 0x0100;
    }
}

bitflags! {
    /// Bitmap bits for `FPGetUserInfo`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct UserInfoBitmap: u16 {
        const USER_ID      = 0x0001;
        const PRI_GROUP_ID = 0x0002;
    }
}

bitflags! {
    /// Access mode bits for `FPOpenFork`
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct AccessMode: u16 {
        const READ       = 0x0001;
        const WRITE      = 0x0002;
        const DENY_READ  = 0x0010;
        const DENY_WRITE = 0x0020;
    }
}

/// Fork selector byte for `FPOpenFork`
pub const FORK_DATA: u8 = 0x00;
/// Resource fork bit for `FPOpenFork`
pub const FORK_RSRC: u8 = 0x80;

/// `FPCreateFile` flag for a soft create (fail if the file exists)
pub const CREATE_SOFT: u8 = 0x00;
/// `FPCreateFile` flag for a hard create (truncate an existing file)
pub const CREATE_HARD: u8 = 0x80;

bitflags! {
    /// Client side volume mount options
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct VolumeFlags: u32 {
        #[doc = "Reject write operations locally"]
        const READ_ONLY        = 0x01;
        #[doc = "Do not filter AppleDouble metadata entries"]
        const SHOW_APPLEDOUBLE = 0x02;
        #[doc = "Ignore server reported Unix privileges"]
        const IGNORE_UNIXPRIVS = 0x04;
        #[doc = "Never issue byte range locks"]
        const NO_LOCKING       = 0x08;
    }
}

bitflags! {
    /// User Authentication Methods as a negotiable mask
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct UamMask: u32 {
        const NO_AUTH   = 0x01;
        const CLEARTEXT = 0x02;
        const RANDNUM   = 0x04;
        const RANDNUM2  = 0x08;
        const DHX       = 0x10;
        const KERBEROS  = 0x20;
        const DHX2      = 0x40;
    }
}

impl UamMask {
    /// The mask tried by default when the caller expresses no preference.
    pub fn default_mask() -> UamMask {
        UamMask::CLEARTEXT | UamMask::RANDNUM | UamMask::RANDNUM2 | UamMask::DHX | UamMask::DHX2
    }

    /// Wire name of a single-bit mask.
    pub fn wire_name(self) -> Option<&'static str> {
        match self.bits() {
            0x01 => Some("No User Authent"),
            0x02 => Some("Cleartxt Passwrd"),
            0x04 => Some("Randnum exchange"),
            0x08 => Some("2-Way Randnum exchange"),
            0x10 => Some("DHCAST128"),
            0x20 => Some("Client Krb v2"),
            0x40 => Some("DHX2"),
            _ => None,
        }
    }

    /// Parse a server advertised UAM string. Unknown names map to an empty mask.
    pub fn from_wire_name(name: &str) -> UamMask {
        match name {
            "No User Authent" => UamMask::NO_AUTH,
            "Cleartxt Passwrd" => UamMask::CLEARTEXT,
            "Randnum exchange" => UamMask::RANDNUM,
            "2-Way Randnum exchange" => UamMask::RANDNUM2,
            "DHCAST128" => UamMask::DHX,
            "Client Krb v2" => UamMask::KERBEROS,
            "DHX2" => UamMask::DHX2,
            _ => UamMask::empty(),
        }
    }
}

/// UAM preference order, strongest first. Guest access is only ever used
/// when it is the sole remaining option or explicitly forced.
pub const UAM_PREFERENCE: [UamMask; 7] = [
    UamMask::DHX2,
    UamMask::DHX,
    UamMask::KERBEROS,
    UamMask::RANDNUM2,
    UamMask::RANDNUM,
    UamMask::CLEARTEXT,
    UamMask::NO_AUTH,
];

/// AFP dialects this client can speak, oldest first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AfpVersion {
    V22,
    V30,
    V31,
    V32,
}

impl AfpVersion {
    pub fn wire_name(self) -> &'static str {
        match self {
            AfpVersion::V22 => "AFP2.2",
            AfpVersion::V30 => "AFPX03",
            AfpVersion::V31 => "AFP3.1",
            AfpVersion::V32 => "AFP3.2",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<AfpVersion> {
        Some(match name {
            "AFP2.2" => AfpVersion::V22,
            "AFPX03" => AfpVersion::V30,
            "AFP3.1" => AfpVersion::V31,
            "AFP3.2" => AfpVersion::V32,
            _ => return None,
        })
    }

    /// Versions are requested numerically on the command line, e.g. `31`.
    pub fn from_number(n: u32) -> Option<AfpVersion> {
        Some(match n {
            22 => AfpVersion::V22,
            30 => AfpVersion::V30,
            31 => AfpVersion::V31,
            32 => AfpVersion::V32,
            _ => return None,
        })
    }

    /// 3.x dialects carry pathnames as UTF-8 with a text encoding hint;
    /// earlier dialects use the one byte counted long-name form.
    pub fn unicode_paths(self) -> bool {
        self >= AfpVersion::V30
    }
}

/// Subfunction codes for `FPMapID`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapIdFunction {
    UserIdToName = 1,
    GroupIdToName = 2,
    UserIdToUtf8Name = 3,
    GroupIdToUtf8Name = 4,
}

/// Subfunction codes for `FPMapName`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapNameFunction {
    NameToUserId = 1,
    NameToGroupId = 2,
    Utf8NameToUserId = 3,
    Utf8NameToGroupId = 4,
}

impl MapIdFunction {
    pub fn utf8(self) -> bool {
        matches!(
            self,
            MapIdFunction::UserIdToUtf8Name | MapIdFunction::GroupIdToUtf8Name
        )
    }
}

/*
 * FPGetSrvrInfo flags word
 */
pub const SRVRINFO_SUPPORTS_SRVR_SIG: u16 = 0x0010;
pub const SRVRINFO_SUPPORTS_TCP: u16 = 0x0020;
pub const SRVRINFO_SUPPORTS_DIR_SERVICES: u16 = 0x0100;
pub const SRVRINFO_SUPPORTS_UTF8_NAME: u16 = 0x0200;

/// Unix privileges quad carried in the `UNIX_PRIVS` parameter block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UnixPrivs {
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub ua_permissions: u32,
}

/// Snapshot of file or directory metadata exchanged with get/set-params.
///
/// On replies, only the fields named by the echoed bitmap are meaningful.
/// On set-params requests, the caller's bitmap must name exactly the fields
/// it filled in; the codec serializes those and nothing else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub is_dir: bool,
    pub attributes: u16,
    pub parent_did: u32,
    /// Unix seconds.
    pub creation_date: i64,
    /// Unix seconds.
    pub modification_date: i64,
    /// Unix seconds.
    pub backup_date: i64,
    pub finder_info: [u8; 32],
    pub name: String,
    pub node_id: u32,
    pub size: u64,
    pub resource_size: u64,
    pub offspring_count: u16,
    pub owner_id: u32,
    pub group_id: u32,
    pub access_rights: u32,
    pub unix_privs: UnixPrivs,
}

impl Default for FileInfo {
    fn default() -> Self {
        FileInfo {
            is_dir: false,
            attributes: 0,
            parent_did: 0,
            creation_date: 0,
            modification_date: 0,
            backup_date: 0,
            finder_info: [0; 32],
            name: String::new(),
            node_id: 0,
            size: 0,
            resource_size: 0,
            offspring_count: 0,
            owner_id: 0,
            group_id: 0,
            access_rights: 0,
            unix_privs: UnixPrivs::default(),
        }
    }
}

/// What `FPGetSrvrInfo` tells us about a server before login.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub machine_type: String,
    pub versions: Vec<String>,
    pub uams: Vec<String>,
    pub flags: u16,
    pub name: String,
    pub utf8_name: String,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    pub icon: Option<Vec<u8>>,
}

impl ServerInfo {
    /// Advertised UAM strings folded into a mask; unknown UAMs are dropped.
    pub fn uam_mask(&self) -> UamMask {
        self.uams
            .iter()
            .fold(UamMask::empty(), |acc, s| acc | UamMask::from_wire_name(s))
    }

    /// Strongest AFP dialect both sides speak, if any.
    pub fn best_version(&self) -> Option<AfpVersion> {
        self.versions
            .iter()
            .filter_map(|s| AfpVersion::from_wire_name(s))
            .max()
    }
}

/// Product family, derived from the machine type string. Informational only.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ServerType {
    #[default]
    Unknown,
    Netatalk,
    Airport,
    Macintosh,
}

impl ServerType {
    pub fn classify(machine_type: &str) -> ServerType {
        match machine_type {
            "Netatalk" => ServerType::Netatalk,
            "Airport" => ServerType::Airport,
            "Macintosh" => ServerType::Macintosh,
            _ => ServerType::Unknown,
        }
    }
}
