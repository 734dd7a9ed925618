//! Volume icon channel: the desktop database and FPGetIcon.
//!
//! Icons are 256 byte classic bitmaps. The server's own icon arrives with
//! the status probe and is served from cache; per-type icons go through the
//! volume's desktop database refnum.

use {
    crate::{
        error::Error,
        ops,
        proto::{K_FP_ITEM_NOT_FOUND, SERVER_ICON_LEN},
        utils::Result,
        volume::Volume,
    },
    log::debug,
};

/// Standard 32x32 1-bit icon selector for FPGetIcon.
pub const ICON_TYPE_ICN: u8 = 0x01;

/// Open the volume's desktop database and remember its refnum on the
/// volume. Idempotent.
pub async fn open_icon_channel(volume: &Volume) -> Result<u16> {
    if let Some(dt_ref) = volume.dt_ref() {
        return Ok(dt_ref);
    }
    let session = volume.server().session().await?;
    let reply = session
        .command(&ops::build_open_dt(volume.id()))
        .await?
        .check()?;
    let dt_ref = ops::parse_open_dt(&reply.body)?;
    volume.set_dt_ref(dt_ref);
    debug!("desktop database open on \"{}\" (ref {})", volume.name(), dt_ref);
    Ok(dt_ref)
}

/// Serve a slice of the server's cached icon from the status probe. Reads
/// past the 256 byte bitmap return empty.
pub fn read_icon(volume: &Volume, offset: usize, len: usize) -> Vec<u8> {
    let icon = match &volume.server().info().icon {
        Some(icon) => icon,
        None => return Vec::new(),
    };
    let end = icon.len().min(SERVER_ICON_LEN);
    if offset >= end {
        return Vec::new();
    }
    icon[offset..end.min(offset + len)].to_vec()
}

/// FPGetIcon for one creator/type pair, bounded to the classic bitmap size.
pub async fn request_icon(
    volume: &Volume,
    creator: [u8; 4],
    file_type: [u8; 4],
    icon_type: u8,
    length: u16,
) -> Result<Vec<u8>> {
    let dt_ref = match volume.dt_ref() {
        Some(dt_ref) => dt_ref,
        None => return Err(Error::Afp(K_FP_ITEM_NOT_FOUND)),
    };
    let length = length.min(SERVER_ICON_LEN as u16);
    let payload = ops::build_get_icon(dt_ref, creator, file_type, icon_type, length);
    let session = volume.server().session().await?;
    let mut icon = session.command(&payload).await?.check()?.body;
    icon.truncate(SERVER_ICON_LEN);
    Ok(icon)
}
