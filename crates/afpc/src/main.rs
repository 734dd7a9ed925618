use {
    clap::{Parser, Subcommand},
    log::debug,
    rafp::{
        io_err,
        proto::{AccessMode, FileInfo, VolumeFlags, DID_ROOT, K_FP_OBJECT_EXISTS},
        res, users, volinfo, ConnectionRequest, Error, Registry, Volume,
    },
    std::io::{self, BufRead, Read, Write},
    std::sync::Arc,
};

mod url;
use crate::url::parse_afp_url;

/// Read or write this much per FPReadExt/FPWriteExt round trip.
const COPY_CHUNK: u64 = 64 * 1024;

#[derive(Debug, clap::Parser)]
#[command(about = "AFP client: probe, mount, and copy files over DSI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe a server and print its advertised identity
    Probe {
        /// [afp://]server[:port]
        url: String,
    },
    /// Open a volume, print its parameters, then close it
    Mount {
        /// [afp://][user[:password]@]server[:port]/volume
        url: String,
        /// Suspend and resume the connection before closing, as a liveness check
        #[arg(long)]
        suspend_resume: bool,
        /// Refuse every mutating operation locally
        #[arg(long)]
        read_only: bool,
    },
    /// Print parameters for one path on a volume
    Stat {
        url: String,
        /// Path relative to the volume root; empty for the root itself
        #[arg(default_value = "")]
        path: String,
    },
    /// Copy a file from a volume to standard output
    Read { url: String, path: String },
    /// Create a file on a volume from standard input
    Write { url: String, path: String },
    /// Delete a file or empty directory
    Rm { url: String, path: String },
    /// Print the logged-in user's ids and names
    Whoami { url: String },
    /// Write the volume's icon bitmap to standard output
    Icon {
        url: String,
        /// Four-byte creator code for an FPGetIcon lookup
        #[arg(long)]
        creator: Option<String>,
        /// Four-byte type code for an FPGetIcon lookup
        #[arg(long = "type")]
        file_type: Option<String>,
    },
}

/// Turn a URL argument into a connection request, prompting when the
/// password is the literal `-`.
fn request_from(url: &str, volume_required: bool) -> rafp::Result<ConnectionRequest> {
    let parsed = parse_afp_url(url)?;
    if volume_required && parsed.volume.is_empty() {
        return Err(Error::Resolve(format!("{}: missing volume name", url)));
    }

    debug!(
        "target {}:{} volume {:?} user {:?}",
        parsed.hostname, parsed.port, parsed.volume, parsed.username
    );
    let password = if parsed.password == "-" {
        prompt_password(&parsed.username)?
    } else {
        parsed.password
    };

    Ok(ConnectionRequest {
        hostname: parsed.hostname,
        port: parsed.port,
        username: parsed.username,
        password,
        volume: parsed.volume,
        ..ConnectionRequest::default()
    })
}

fn prompt_password(username: &str) -> rafp::Result<String> {
    eprint!("Password for {}: ", username);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\n', '\r']).to_string();
    if password.is_empty() {
        return res!(io_err!(InvalidInput, "empty password"));
    }
    Ok(password)
}

fn four_cc(arg: &str) -> rafp::Result<[u8; 4]> {
    let bytes = arg.as_bytes();
    if bytes.len() != 4 {
        return res!(io_err!(InvalidInput, "creator and type codes are 4 bytes"));
    }
    let mut code = [0u8; 4];
    code.copy_from_slice(bytes);
    Ok(code)
}

fn print_file_info(info: &FileInfo) {
    println!("name:     {}", info.name);
    println!("kind:     {}", if info.is_dir { "directory" } else { "file" });
    println!("node id:  {}", info.node_id);
    println!("parent:   {}", info.parent_did);
    if info.is_dir {
        println!("children: {}", info.offspring_count);
        println!("owner:    {} group: {}", info.owner_id, info.group_id);
    } else {
        println!("size:     {} (+{} resource)", info.size, info.resource_size);
    }
    println!("mode:     {:o}", info.unix_privs.permissions);
    println!("uid/gid:  {}/{}", info.unix_privs.uid, info.unix_privs.gid);
    println!("created:  {}", info.creation_date);
    println!("modified: {}", info.modification_date);
}

async fn cmd_probe(url: &str) -> rafp::Result<i32> {
    let request = request_from(url, false)?;
    let address = tokio::net::lookup_host((request.hostname.as_str(), request.port))
        .await
        .map_err(|e| Error::Resolve(format!("{}: {}", request.hostname, e)))?
        .next()
        .ok_or_else(|| Error::Resolve(format!("{}: no addresses", request.hostname)))?;

    let info = rafp::server::probe(address).await?;
    println!("server:   {}", info.name);
    if !info.utf8_name.is_empty() {
        println!("utf8:     {}", info.utf8_name);
    }
    println!("machine:  {}", info.machine_type);
    println!("versions: {}", info.versions.join(", "));
    println!("uams:     {}", info.uams.join(", "));
    match info.signature {
        Some(signature) => {
            let hex: String = signature.iter().map(|b| format!("{:02x}", b)).collect();
            println!("signature: {}", hex);
        }
        None => println!("signature: none"),
    }
    println!("icon:     {}", if info.icon.is_some() { "yes" } else { "no" });
    Ok(0)
}

/// Mount a volume, run `body` against it, and always tear the registry down.
async fn with_volume<F, Fut>(request: &ConnectionRequest, body: F) -> rafp::Result<i32>
where
    F: FnOnce(Registry, Arc<Volume>) -> Fut,
    Fut: std::future::Future<Output = rafp::Result<i32>>,
{
    let registry = Registry::new();
    let volume = registry.mount(request).await?;
    body(registry, volume).await
}

async fn cmd_mount(url: &str, suspend_resume: bool, read_only: bool) -> rafp::Result<i32> {
    let mut request = request_from(url, true)?;
    if read_only {
        request.volume_flags |= VolumeFlags::READ_ONLY;
    }

    with_volume(&request, |registry, volume| async move {
        let params = volume.params();
        println!("volume:   {} (id {})", volume.name(), volume.id());
        println!("free:     {} of {} bytes", params.bytes_free, params.bytes_total);
        println!("signature: {}", params.signature);

        if suspend_resume {
            let server_name = volume.server().name().to_string();
            registry.suspend(&server_name).await?;
            registry.resume(&server_name).await?;
            volume.server().session().await?;
            println!("suspend/resume: ok");
        }

        print!("{}", registry.status().await);
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn cmd_stat(url: &str, path: &str) -> rafp::Result<i32> {
    let request = request_from(url, true)?;
    let path = path.to_string();
    with_volume(&request, |registry, volume| async move {
        let info = volume.stat(DID_ROOT, &path).await?;
        print_file_info(&info);
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn cmd_read(url: &str, path: &str) -> rafp::Result<i32> {
    let request = request_from(url, true)?;
    let path = path.to_string();
    with_volume(&request, |registry, volume| async move {
        let fork = volume
            .open_fork(DID_ROOT, &path, false, AccessMode::READ)
            .await?;
        let mut offset = 0u64;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        loop {
            let data = volume.read(&fork, offset, COPY_CHUNK).await?;
            if data.is_empty() {
                break;
            }
            offset += data.len() as u64;
            out.write_all(&data)?;
        }
        out.flush()?;
        volume.close_fork(fork).await?;
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn cmd_write(url: &str, path: &str) -> rafp::Result<i32> {
    let request = request_from(url, true)?;
    let path = path.to_string();

    let mut data = Vec::new();
    io::stdin().lock().read_to_end(&mut data)?;

    with_volume(&request, |registry, volume| async move {
        match volume.create_file(DID_ROOT, &path, false).await {
            Ok(()) | Err(Error::Afp(K_FP_OBJECT_EXISTS)) => {}
            Err(e) => return Err(e),
        }

        let fork = volume
            .open_fork(DID_ROOT, &path, false, AccessMode::WRITE)
            .await?;
        let mut offset = 0u64;
        while (offset as usize) < data.len() {
            let end = data.len().min(offset as usize + COPY_CHUNK as usize);
            let written = volume.write(&fork, offset, &data[offset as usize..end]).await?;
            if written == 0 {
                return res!(io_err!(WriteZero, "server accepted no data"));
            }
            offset += written;
        }
        volume.close_fork(fork).await?;
        eprintln!("wrote {} bytes to {}", offset, path);
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn cmd_rm(url: &str, path: &str) -> rafp::Result<i32> {
    let request = request_from(url, true)?;
    let path = path.to_string();
    with_volume(&request, |registry, volume| async move {
        volume.delete(DID_ROOT, &path).await?;
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn cmd_whoami(url: &str) -> rafp::Result<i32> {
    let request = request_from(url, false)?;
    let registry = Registry::new();
    let server = registry.connect(&request).await?;

    let ids = users::current_user(&server).await?;
    let user = users::user_name(&server, ids.uid).await.unwrap_or_default();
    let group = users::group_name(&server, ids.gid).await.unwrap_or_default();
    println!("uid {} ({})", ids.uid, user);
    println!("gid {} ({})", ids.gid, group);

    registry.exit().await;
    Ok(0)
}

async fn cmd_icon(url: &str, creator: Option<&str>, file_type: Option<&str>) -> rafp::Result<i32> {
    let request = request_from(url, true)?;
    let codes = match (creator, file_type) {
        (Some(creator), Some(file_type)) => Some((four_cc(creator)?, four_cc(file_type)?)),
        (None, None) => None,
        _ => return res!(io_err!(InvalidInput, "--creator and --type go together")),
    };

    with_volume(&request, |registry, volume| async move {
        let icon = match codes {
            Some((creator, file_type)) => {
                volinfo::request_icon(
                    &volume,
                    creator,
                    file_type,
                    volinfo::ICON_TYPE_ICN,
                    rafp::proto::SERVER_ICON_LEN as u16,
                )
                .await?
            }
            None => volinfo::read_icon(&volume, 0, rafp::proto::SERVER_ICON_LEN),
        };
        io::stdout().lock().write_all(&icon)?;
        registry.exit().await;
        Ok(0)
    })
    .await
}

async fn afpc_main(cli: Cli) -> rafp::Result<i32> {
    match &cli.command {
        Command::Probe { url } => cmd_probe(url).await,
        Command::Mount {
            url,
            suspend_resume,
            read_only,
        } => cmd_mount(url, *suspend_resume, *read_only).await,
        Command::Stat { url, path } => cmd_stat(url, path).await,
        Command::Read { url, path } => cmd_read(url, path).await,
        Command::Write { url, path } => cmd_write(url, path).await,
        Command::Rm { url, path } => cmd_rm(url, path).await,
        Command::Whoami { url } => cmd_whoami(url).await,
        Command::Icon {
            url,
            creator,
            file_type,
        } => cmd_icon(url, creator.as_deref(), file_type.as_deref()).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = afpc_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        -1
    });

    std::process::exit(exit_code);
}
