use std::io;

use tracing::{debug, info};

use crate::server::poller::cvt;

/// Raises the open-file soft limit toward `target`, capped by the hard
/// limit. Returns the soft limit in effect afterwards.
pub fn raise_nofile(target: u64) -> io::Result<u64> {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    cvt(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) })?;

    let current = lim.rlim_cur as u64;
    let wanted = target.min(lim.rlim_max as u64);
    if wanted <= current {
        debug!(soft = current, "fd limit already sufficient");
        return Ok(current);
    }

    lim.rlim_cur = wanted as libc::rlim_t;
    cvt(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) })?;
    info!(from = current, to = wanted, "raised fd limit");
    Ok(wanted)
}
