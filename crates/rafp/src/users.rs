//! Identity mapping between numeric ids and names.
//!
//! Thin wrappers over FPMapID, FPMapName, and FPGetUserInfo. Outputs are
//! always fully initialized: a partial FPGetUserInfo reply yields zeroes for
//! the fields the server left out, never stale memory.

use {
    crate::{
        ops,
        proto::{MapIdFunction, MapNameFunction, UserInfoBitmap},
        server::Server,
        utils::Result,
    },
};

/// The logged-in user's ids, zero when the server did not report them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserIds {
    pub uid: u32,
    pub gid: u32,
}

/// FPMapID with an explicit subfunction.
pub async fn map_id(server: &Server, function: MapIdFunction, id: u32) -> Result<String> {
    let reply = server
        .session()
        .await?
        .command(&ops::build_map_id(function, id))
        .await?
        .check()?;
    ops::parse_map_id(&reply.body)
}

/// FPMapName with an explicit subfunction.
pub async fn map_name(server: &Server, function: MapNameFunction, name: &str) -> Result<u32> {
    let payload = ops::build_map_name(function, name)?;
    let reply = server.session().await?.command(&payload).await?.check()?;
    ops::parse_map_name(&reply.body)
}

fn user_id_function(server: &Server) -> MapIdFunction {
    if server.version().unicode_paths() {
        MapIdFunction::UserIdToUtf8Name
    } else {
        MapIdFunction::UserIdToName
    }
}

fn group_id_function(server: &Server) -> MapIdFunction {
    if server.version().unicode_paths() {
        MapIdFunction::GroupIdToUtf8Name
    } else {
        MapIdFunction::GroupIdToName
    }
}

pub async fn user_name(server: &Server, uid: u32) -> Result<String> {
    map_id(server, user_id_function(server), uid).await
}

pub async fn group_name(server: &Server, gid: u32) -> Result<String> {
    map_id(server, group_id_function(server), gid).await
}

pub async fn user_id(server: &Server, name: &str) -> Result<u32> {
    let function = if server.version().unicode_paths() {
        MapNameFunction::Utf8NameToUserId
    } else {
        MapNameFunction::NameToUserId
    };
    map_name(server, function, name).await
}

pub async fn group_id(server: &Server, name: &str) -> Result<u32> {
    let function = if server.version().unicode_paths() {
        MapNameFunction::Utf8NameToGroupId
    } else {
        MapNameFunction::NameToGroupId
    };
    map_name(server, function, name).await
}

/// FPGetUserInfo for the logged-in user. Each id is taken only when its
/// reply bit is set; the other keeps its zero default.
pub async fn current_user(server: &Server) -> Result<UserIds> {
    let bitmap = UserInfoBitmap::USER_ID | UserInfoBitmap::PRI_GROUP_ID;
    let reply = server
        .session()
        .await?
        .command(&ops::build_get_user_info(bitmap))
        .await?
        .check()?;
    let parsed = ops::parse_get_user_info(&reply.body)?;
    Ok(UserIds {
        uid: parsed.user_id.unwrap_or(0),
        gid: parsed.group_id.unwrap_or(0),
    })
}
