//! Host identity reported at checkin

use std::fmt::Write as _;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use tether_proto::CheckinInfo;
use tokio::net::UdpSocket;
use tracing::debug;

/// Gather what the checkin record reports about this host.
///
/// `route` is an endpoint address used only to learn which local
/// interface routes to the controller; no datagram is sent.
pub async fn collect(route: (&str, u16)) -> CheckinInfo {
    CheckinInfo {
        ips: local_ips(route).await,
        os: os_description(),
        arch: arch_code(),
        hostname: hostname(),
        user: env_first(&["USER", "USERNAME", "LOGNAME"]),
        domain: env_first(&["USERDOMAIN"]),
        pid: std::process::id(),
        process: process_name(),
        external_ip: String::new(),
    }
}

/// Architecture code used on the wire
pub fn arch_code() -> u8 {
    if cfg!(target_arch = "x86_64") || cfg!(target_arch = "aarch64") {
        0x64
    } else if cfg!(target_arch = "x86") || cfg!(target_arch = "arm") {
        0x86
    } else {
        0
    }
}

fn env_first(names: &[&str]) -> String {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

async fn local_ips(route: (&str, u16)) -> Vec<Ipv4Addr> {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("Cannot bind route socket: {}", e);
            return Vec::new();
        }
    };
    if let Err(e) = socket.connect(route).await {
        debug!("Cannot route to {}:{}: {}", route.0, route.1, e);
        return Vec::new();
    }
    match socket.local_addr().map(|addr| addr.ip()) {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => vec![ip],
        _ => Vec::new(),
    }
}

fn hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            debug!("Cannot read hostname: {}", e);
            env_first(&["HOSTNAME", "COMPUTERNAME"])
        }
    }
}

#[cfg(unix)]
fn os_description() -> String {
    match nix::sys::utsname::uname() {
        Ok(uts) => format!(
            "{} {}",
            uts.sysname().to_string_lossy(),
            uts.release().to_string_lossy()
        ),
        Err(e) => {
            debug!("uname failed: {}", e);
            std::env::consts::OS.to_string()
        }
    }
}

#[cfg(not(unix))]
fn os_description() -> String {
    std::env::consts::OS.to_string()
}

/// Account the agent runs as, `name (uid N)` where the uid is known
#[cfg(unix)]
pub fn current_user() -> String {
    use nix::unistd::{getuid, User};

    let uid = getuid();
    let name = match User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        Ok(None) => env_first(&["USER", "LOGNAME"]),
        Err(e) => {
            debug!("Cannot resolve uid {}: {}", uid, e);
            env_first(&["USER", "LOGNAME"])
        }
    };
    format!("{} (uid {})", name, uid)
}

/// Account the agent runs as, `DOMAIN\user` where the domain is set
#[cfg(not(unix))]
pub fn current_user() -> String {
    let user = env_first(&["USERNAME", "USER"]);
    match env_first(&["USERDOMAIN"]) {
        domain if domain.is_empty() => user,
        domain => format!("{}\\{}", domain, user),
    }
}

/// One row of the process listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id
    pub pid: u32,
    /// Parent process id
    pub ppid: u32,
    /// Executable name
    pub name: String,
}

/// Parse a `/proc/<pid>/stat` line; the name may itself hold parentheses
fn parse_stat(line: &str) -> Option<ProcessEntry> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    let pid = line[..open].trim().parse().ok()?;
    let name = line.get(open + 1..close)?.to_string();
    let mut rest = line.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some(ProcessEntry { pid, ppid, name })
}

/// Running processes ordered by pid
#[cfg(target_os = "linux")]
pub async fn processes() -> io::Result<Vec<ProcessEntry>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir("/proc").await?;
    while let Some(entry) = dir.next_entry().await? {
        if !entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // processes can exit between the listing and the read
        match tokio::fs::read_to_string(entry.path().join("stat")).await {
            Ok(line) => entries.extend(parse_stat(&line)),
            Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    entries.sort_by_key(|entry| entry.pid);
    Ok(entries)
}

/// Running processes ordered by pid
#[cfg(not(target_os = "linux"))]
pub async fn processes() -> io::Result<Vec<ProcessEntry>> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Tab separated process table with a header row
pub fn format_processes(entries: &[ProcessEntry]) -> String {
    let mut table = String::from("PID\tPPID\tNAME\n");
    for entry in entries {
        let _ = writeln!(table, "{}\t{}\t{}", entry.pid, entry.ppid, entry.name);
    }
    table
}
