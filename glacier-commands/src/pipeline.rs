//! Two-command pipelines (`a | b`).
//!
//! Spec §9 flags upstream pipe support as partially stubbed and permits,
//! but does not require, full robustness here — "minimal builds do not
//! use them". This gives a leader/follower pair one shared OS pipe and
//! joins their exit callbacks; it does not implement longer chains, `;`
//! sequencing, or `||`/`&&` short-circuiting, none of which the command
//! engine itself needs (those belong to the collaborator building the
//! command list).

use {
    crate::{
        error::CommandError,
        raw::{spawn_with_overrides, CapturedStreams, ExitOutcome, RawCommand},
    },
    glacier_reactor::Reactor,
    std::{cell::RefCell, rc::Rc},
};

/// Spawn `leader | follower`: an OS pipe connects the leader's stdout to
/// the follower's stdin, overriding whatever `stdout`/`stdin`
/// [`crate::raw::StreamEndpoint`] each command declared for that stream.
/// `on_exit` fires once, after both sides have exited.
pub fn spawn_pipeline(
    leader: RawCommand,
    follower: RawCommand,
    reactor: &mut dyn Reactor,
    on_exit: impl FnOnce(ExitOutcome, ExitOutcome) + 'static,
) -> Result<(CapturedStreams, CapturedStreams), CommandError> {
    let leader_name = leader.display_name();
    let (write, read) =
        pipe().map_err(|source| CommandError::Spawn { program: leader_name, source })?;

    let joined: Rc<RefCell<(Option<ExitOutcome>, Option<ExitOutcome>)>> =
        Rc::new(RefCell::new((None, None)));
    let on_exit = Rc::new(RefCell::new(Some(on_exit)));

    let joined_leader = joined.clone();
    let on_exit_leader = on_exit.clone();
    let leader_captured = spawn_with_overrides(
        leader,
        reactor,
        move |exit| {
            joined_leader.borrow_mut().0 = Some(exit);
            fire_when_both_done(&joined_leader, &on_exit_leader);
        },
        None,
        Some(write),
    )?;

    let joined_follower = joined;
    let on_exit_follower = on_exit;
    let follower_captured = spawn_with_overrides(
        follower,
        reactor,
        move |exit| {
            joined_follower.borrow_mut().1 = Some(exit);
            fire_when_both_done(&joined_follower, &on_exit_follower);
        },
        Some(read),
        None,
    )?;

    Ok((leader_captured, follower_captured))
}

fn fire_when_both_done<F: FnOnce(ExitOutcome, ExitOutcome)>(
    joined: &Rc<RefCell<(Option<ExitOutcome>, Option<ExitOutcome>)>>,
    on_exit: &Rc<RefCell<Option<F>>>,
) {
    let both = {
        let state = joined.borrow();
        match (state.0, state.1) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    };
    if let Some((a, b)) = both {
        if let Some(callback) = on_exit.borrow_mut().take() {
            callback(a, b);
        }
    }
}

#[cfg(unix)]
fn pipe() -> std::io::Result<(std::os::unix::io::OwnedFd, std::os::unix::io::OwnedFd)> {
    use std::os::unix::io::{FromRawFd, OwnedFd};
    let mut fds = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fds were just created by pipe2 above and are owned here.
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    Ok((write, read))
}

#[cfg(windows)]
fn pipe() -> std::io::Result<(std::os::windows::io::OwnedHandle, std::os::windows::io::OwnedHandle)> {
    let pair = sys_ext::windows::create_overlapped_pipe()?;
    Ok((pair.write, pair.read))
}
