//! TCP (RFC 793 state machine, RFC 5681 congestion control, RFC 6298 RTO
//! estimation).
//!
//! No equivalent exists in `sw/net` (UDP/ICMP/ARP only); the socket
//! pool shape — a fixed-capacity table of slots rather than per-connection
//! heap allocation — follows the bounded-capacity container pattern
//! established by [`crate::arp::ArpCache`]/[`crate::ndp::NdpCache`], and the
//! tick-driven retry/backoff machinery reuses [`crate::timers::Countdown`]
//! exactly as [`crate::dhcp::DhcpClient`] does.
//!
//! This module owns socket state and decides *what* to send; it does not
//! touch a driver or frame pool directly. [`crate::stack::Stack`] reads back
//! [`SegmentOut`] descriptors, asks `peek_payload` to copy the carried bytes
//! out of the retained send buffer, and hands the assembled segment to
//! [`crate::iface`] for transmission.

pub mod segment;

use alloc::collections::VecDeque;
use heapless::Vec;

use crate::addr::{Ipv4Addr, Ipv6Addr};
use crate::config::TcpConfig;
use crate::error::{NetError, NetResult};
use crate::timers::{s_to_ticks, Countdown, CountdownStatus};
use segment::Flags;

/// RFC 793's eleven connection states, plus `Unused` marking a free slot in
/// the socket table (not itself an RFC 793 state).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unused,
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpEndpoint {
    V4 { addr: Ipv4Addr, port: u16 },
    V6 { addr: Ipv6Addr, port: u16 },
}

const MIN_RTO_TICKS: u32 = 3; // RFC 6298 floor, here 300ms at a 100ms tick.
const MAX_RTO_TICKS: u32 = 600; // 60s ceiling.
const INITIAL_RTO_TICKS: u32 = 10; // 1s, RFC 6298 §2.1.
const MAX_RETRIES: u8 = 7; // Exhausted retransmit budget aborts the connection.
/// Shortened from RFC 793's full 2*MSL (often 4 minutes) to something an
/// embedded device with a handful of socket slots can actually afford to
/// spend sitting idle; see DESIGN.md's Open Question notes.
const TIME_WAIT_DWELL_S: u32 = 30;
/// RFC 5681's implicit 16-bit window ceiling; every `cwnd` update saturates
/// here rather than growing into a range no peer window field can express.
const MAX_CWND: u32 = 65535;

fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}
fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}
fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// True if `seq` falls within the receive window `[rcv_nxt, rcv_nxt+rcv_wnd)`,
/// the in-window test RFC 5961 uses to decide whether an unexpected RST or SYN
/// is worth a challenge ACK rather than an outright drop.
fn seq_in_window(seq: u32, rcv_nxt: u32, rcv_wnd: u16) -> bool {
    seq.wrapping_sub(rcv_nxt) < rcv_wnd as u32
}

/// A segment this module wants sent. The caller copies `payload_len` bytes
/// starting at `payload_from` out of the socket's retained send buffer via
/// [`TcpSockets::peek_payload`] — this module never touches frame buffers
/// itself.
#[derive(Clone, Copy, Debug)]
pub struct SegmentOut {
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
    pub mss: Option<u16>,
    pub payload_from: u32,
    pub payload_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecoveryMode {
    None,
    FastRecovery,
}

struct Socket {
    state: State,
    local: IpEndpoint,
    remote: Option<IpEndpoint>,
    mss: u16,
    peer_mss: u16,

    // Send sequence variables (RFC 793 §3.2 fig. 4).
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u32,
    snd_wl1: u32,
    snd_wl2: u32,
    iss: u32,

    // Receive sequence variables.
    rcv_nxt: u32,
    rcv_wnd: u16,
    irs: u32,

    // RFC 5681 congestion control, in bytes.
    cwnd: u32,
    ssthresh: u32,
    recovery: RecoveryMode,
    dup_acks: u8,
    /// `snd_nxt` at the moment fast recovery was entered — the send
    /// checkpoint fast recovery is waiting to see acknowledged before it can
    /// exit back to congestion avoidance.
    recovery_point: u32,

    // RFC 6298 RTO estimation.
    srtt: Option<u32>,
    rttvar: Option<u32>,
    rto_ticks: u32,
    rto_timer: Countdown,
    rtt_probe: Option<(u32, u32)>, // (seq being timed, ticks elapsed)
    retries: u8,

    time_wait_timer: Countdown,
    /// Guards against a socket API call made from inside this module's own
    /// segment-processing callback re-entering the same socket (e.g. an
    /// application `send()` triggered by a receive notification) and
    /// corrupting mid-update send/receive sequence state.
    in_callback: bool,

    tx_buf: VecDeque<u8>,
    tx_cap: usize,
    rx_buf: VecDeque<u8>,
    rx_cap: usize,

    pending_fin: bool,
    last_error: Option<NetError>,
}

impl Socket {
    fn blank(local: IpEndpoint) -> Self {
        Socket {
            state: State::Unused,
            local,
            remote: None,
            mss: 0,
            peer_mss: 536,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: 0,
            snd_wl1: 0,
            snd_wl2: 0,
            iss: 0,
            rcv_nxt: 0,
            rcv_wnd: 0,
            irs: 0,
            cwnd: 0,
            ssthresh: u32::MAX,
            recovery: RecoveryMode::None,
            dup_acks: 0,
            recovery_point: 0,
            srtt: None,
            rttvar: None,
            rto_ticks: INITIAL_RTO_TICKS,
            rto_timer: Countdown::new(),
            rtt_probe: None,
            retries: 0,
            time_wait_timer: Countdown::new(),
            in_callback: false,
            tx_buf: VecDeque::new(),
            tx_cap: 0,
            rx_buf: VecDeque::new(),
            rx_cap: 0,
            pending_fin: false,
            last_error: None,
        }
    }

    fn initial_cwnd(mss: u16) -> u32 {
        // RFC 5681 §3.1: min(4*MSS, max(2*MSS, 4380 bytes)).
        (4 * mss as u32).min((2 * mss as u32).max(4380))
    }

    fn in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    fn unsent_len(&self) -> usize {
        self.tx_buf.len() - self.in_flight() as usize
    }

    fn reset_retransmit_timer(&mut self) {
        if self.in_flight() > 0 {
            self.rto_timer.start(self.rto_ticks);
        } else {
            self.rto_timer.clear();
        }
    }

    /// RFC 5681 per-ACK congestion window growth: one MSS per RTT in slow
    /// start, roughly one MSS per RTT in congestion avoidance.
    fn grow_cwnd(&mut self, acked: u32) {
        let mss = self.mss.max(1) as u32;
        if self.cwnd < self.ssthresh {
            self.cwnd = self.cwnd.saturating_add(acked.min(mss));
        } else {
            self.cwnd = self.cwnd.saturating_add((mss * acked) / self.cwnd.max(1)).max(self.cwnd);
        }
        self.cwnd = self.cwnd.min(MAX_CWND);
    }

    /// RTO-timeout loss recovery (RFC 6298): the whole flight is presumed
    /// lost, so the window collapses all the way back to one MSS.
    fn enter_loss_recovery(&mut self) {
        let mss = self.mss.max(1) as u32;
        self.ssthresh = (self.in_flight() / 2).max(2 * mss);
        self.cwnd = mss;
        self.recovery = RecoveryMode::None;
        self.dup_acks = 0;
    }

    /// RFC 5681 §3.2 fast retransmit: unlike the RTO path, only the one
    /// segment flagged by three duplicate ACKs is presumed lost, so ssthresh
    /// is derived from the current window rather than the whole flight, and
    /// cwnd inflates by 3*MSS rather than collapsing — those three duplicate
    /// ACKs each mean a segment has left the network and is sitting in the
    /// receiver's reorder buffer, not the sender's.
    fn enter_fast_recovery(&mut self) {
        let mss = self.mss.max(1) as u32;
        self.ssthresh = (self.snd_wnd.min(self.cwnd) / 2).max(2 * mss);
        self.cwnd = (self.ssthresh + 3 * mss).min(MAX_CWND);
        self.recovery_point = self.snd_nxt;
    }

    fn sample_rtt(&mut self, measured_ticks: u32) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let delta = (srtt as i64 - measured_ticks as i64).unsigned_abs() as u32;
                self.rttvar = Some((3 * rttvar + delta) / 4);
                self.srtt = Some((7 * srtt + measured_ticks) / 8);
            }
            _ => {
                self.srtt = Some(measured_ticks);
                self.rttvar = Some(measured_ticks / 2);
            }
        }
        self.rto_ticks = (self.srtt.unwrap() + 4 * self.rttvar.unwrap().max(1)).clamp(MIN_RTO_TICKS, MAX_RTO_TICKS);
    }
}

/// Fixed-capacity socket pool; `N` bounds the number of simultaneously open
/// connections this engine will track ( `max_sockets`).
pub struct TcpSockets<const N: usize> {
    sockets: Vec<Socket, N>,
    cfg: TcpConfig,
}

impl<const N: usize> TcpSockets<N> {
    pub fn new(cfg: TcpConfig) -> Self {
        TcpSockets { sockets: Vec::new(), cfg }
    }

    /// Acquire a free slot, returning its index. Fails with `Busy` once the
    /// pool is full, mirroring the rest of the engine's bounded-resource
    /// convention.
    pub fn get_socket(&mut self, local: IpEndpoint) -> NetResult<usize> {
        if let Some(idx) = self.sockets.iter().position(|s| s.state == State::Unused) {
            self.sockets[idx] = Socket::blank(local);
            self.sockets[idx].tx_cap = 4096;
            self.sockets[idx].rx_cap = self.cfg.recv_window as usize;
            return Ok(idx);
        }
        if self.sockets.is_full() {
            return Err(NetError::Busy);
        }
        let mut s = Socket::blank(local);
        s.tx_cap = 4096;
        s.rx_cap = self.cfg.recv_window as usize;
        self.sockets.push(s).map_err(|_| NetError::Busy)?;
        Ok(self.sockets.len() - 1)
    }

    fn socket(&mut self, idx: usize) -> NetResult<&mut Socket> {
        self.sockets.get_mut(idx).ok_or(NetError::InvalidParameter)
    }

    pub fn state(&self, idx: usize) -> Option<State> {
        self.sockets.get(idx).map(|s| s.state)
    }

    /// Local/remote endpoint pair for a connected socket, so the caller can
    /// address a [`SegmentOut`] without threading the 4-tuple through
    /// [`Self::tick`]/[`Self::receive`] itself.
    pub fn endpoints(&self, idx: usize) -> Option<(IpEndpoint, IpEndpoint)> {
        self.sockets.get(idx).and_then(|s| s.remote.map(|r| (s.local, r)))
    }

    pub fn listen(&mut self, idx: usize) -> NetResult<()> {
        let s = self.socket(idx)?;
        if s.state != State::Closed && s.state != State::Unused {
            return Err(NetError::WrongState);
        }
        s.state = State::Listen;
        Ok(())
    }

    /// Active open (RFC 793 §3.9 "OPEN Call"). Returns the SYN segment to
    /// transmit.
    pub fn connect(&mut self, idx: usize, remote: IpEndpoint, iss: u32, mss: u16) -> NetResult<SegmentOut> {
        let s = self.socket(idx)?;
        if s.state != State::Closed && s.state != State::Unused {
            return Err(NetError::WrongState);
        }
        s.remote = Some(remote);
        s.mss = mss;
        s.iss = iss;
        s.snd_una = iss;
        s.snd_nxt = iss.wrapping_add(1);
        s.rcv_wnd = s.rx_cap.min(u16::MAX as usize) as u16;
        s.cwnd = Socket::initial_cwnd(mss);
        s.state = State::SynSent;
        s.rto_timer.start(s.rto_ticks);
        Ok(SegmentOut { seq: iss, ack: 0, flags: Flags::SYN, window: s.rcv_wnd, mss: Some(mss), payload_from: 0, payload_len: 0 })
    }

    /// Spawn a connected socket from a listening one upon an inbound SYN
    /// (the engine's socket pool has no separate accept backlog — the new
    /// connection occupies its own slot immediately, as in lwIP's
    /// `tcp_pcb` model rather than BSD's listen-queue).
    pub fn accept_into(&mut self, listen_idx: usize, remote: IpEndpoint, peer_seq: u32, peer_mss: u16, iss: u32) -> NetResult<(usize, SegmentOut)> {
        let listen_local = {
            let l = self.socket(listen_idx)?;
            if l.state != State::Listen {
                return Err(NetError::WrongState);
            }
            l.local
        };
        let idx = self.get_socket(listen_local)?;
        let mss = self.cfg.default_mss;
        let s = self.socket(idx)?;
        s.remote = Some(remote);
        s.mss = mss;
        s.peer_mss = peer_mss.max(1);
        s.iss = iss;
        s.snd_una = iss;
        s.snd_nxt = iss.wrapping_add(1);
        s.irs = peer_seq;
        s.rcv_nxt = peer_seq.wrapping_add(1);
        s.rcv_wnd = s.rx_cap.min(u16::MAX as usize) as u16;
        s.cwnd = Socket::initial_cwnd(mss);
        s.state = State::SynReceived;
        s.rto_timer.start(s.rto_ticks);
        Ok((idx, SegmentOut { seq: iss, ack: s.rcv_nxt, flags: Flags::SYN_ACK, window: s.rcv_wnd, mss: Some(mss), payload_from: 0, payload_len: 0 }))
    }

    /// Find the socket a segment addresses: an established 4-tuple match
    /// first, falling back to a listening 2-tuple match for new SYNs.
    pub fn find_socket(&self, local: IpEndpoint, remote: IpEndpoint) -> Option<usize> {
        self.sockets
            .iter()
            .position(|s| s.state != State::Unused && s.local == local && s.remote == Some(remote))
            .or_else(|| self.sockets.iter().position(|s| s.state == State::Listen && s.local == local))
    }

    /// Bytes the caller may queue with [`Self::send`] right now without
    /// blocking ( `send_ready`).
    pub fn send_ready(&self, idx: usize) -> usize {
        self.sockets.get(idx).map(|s| s.tx_cap - s.tx_buf.len()).unwrap_or(0)
    }

    /// Queue outbound application bytes ( `send`). Returns the
    /// number actually accepted, which may be less than `data.len()` if the
    /// send buffer is nearly full.
    pub fn send(&mut self, idx: usize, data: &[u8]) -> NetResult<usize> {
        let s = self.socket(idx)?;
        if !matches!(s.state, State::Established | State::CloseWait) {
            return Err(NetError::WrongState);
        }
        let room = s.tx_cap - s.tx_buf.len();
        let n = data.len().min(room);
        s.tx_buf.extend(data[..n].iter().copied());
        Ok(n)
    }

    /// Drain up to `out.len()` bytes of in-order received application data
    /// ( `get_buf`).
    pub fn get_buf(&mut self, idx: usize, out: &mut [u8]) -> usize {
        let Some(s) = self.sockets.get_mut(idx) else { return 0 };
        let n = out.len().min(s.rx_buf.len());
        for (i, b) in s.rx_buf.drain(..n).enumerate() {
            out[i] = b;
        }
        s.rcv_wnd = (s.rx_cap - s.rx_buf.len()).min(u16::MAX as usize) as u16;
        n
    }

    pub fn peek_payload(&self, idx: usize, seq: u32, len: usize, out: &mut [u8]) -> usize {
        let Some(s) = self.sockets.get(idx) else { return 0 };
        let offset = seq.wrapping_sub(s.snd_una) as usize;
        if offset > s.tx_buf.len() {
            return 0;
        }
        let n = len.min(s.tx_buf.len() - offset).min(out.len());
        for i in 0..n {
            out[i] = s.tx_buf[offset + i];
        }
        n
    }

    /// Graceful close (RFC 793 §3.9 "CLOSE Call"). Returns the FIN segment
    /// to send once any queued data has drained ahead of it, or `None` if
    /// the state requires no action (already closing/closed).
    pub fn close(&mut self, idx: usize) -> NetResult<Option<SegmentOut>> {
        let s = self.socket(idx)?;
        match s.state {
            State::Established => {
                s.state = State::FinWait1;
                s.pending_fin = true;
                Ok(None) // FIN is emitted by `tick`/`drain_send` once data is flushed.
            }
            State::CloseWait => {
                s.state = State::LastAck;
                s.pending_fin = true;
                Ok(None)
            }
            State::Listen | State::SynSent => {
                s.state = State::Closed;
                Ok(None)
            }
            _ => Err(NetError::WrongState),
        }
    }

    /// Abortive close (RFC 793 §3.9 "ABORT Call"): send RST if the
    /// connection had a remote peer, then free the slot immediately.
    pub fn abort(&mut self, idx: usize) -> NetResult<Option<SegmentOut>> {
        let s = self.socket(idx)?;
        let out = if matches!(s.state, State::Established | State::SynReceived | State::FinWait1 | State::FinWait2 | State::CloseWait) {
            Some(SegmentOut { seq: s.snd_nxt, ack: s.rcv_nxt, flags: Flags::RST_ACK, window: 0, mss: None, payload_from: 0, payload_len: 0 })
        } else {
            None
        };
        *s = Socket::blank(s.local);
        Ok(out)
    }

    /// Core segment-receive processing (RFC 793 §3.9). `idx` must already
    /// have been resolved via [`Self::find_socket`]/[`Self::accept_into`].
    /// Returns up to two segments to emit this step (e.g. an ACK plus a
    /// piggy-backed retransmission) and whether the socket's slot should now
    /// be freed.
    pub fn receive(&mut self, idx: usize, seg: &segment::Segment<'_>) -> NetResult<Vec<SegmentOut, 2>> {
        let s = self.socket(idx)?;
        if s.in_callback {
            return Err(NetError::Busy);
        }
        s.in_callback = true;
        let result = Self::receive_inner(s, seg);
        if let Ok(s) = self.socket(idx) {
            s.in_callback = false;
        }
        result
    }

    fn receive_inner(s: &mut Socket, seg: &segment::Segment<'_>) -> NetResult<Vec<SegmentOut, 2>> {
        let mut out: Vec<SegmentOut, 2> = Vec::new();

        if seg.flags.rst {
            // RFC 5961 §3.2 blind-reset mitigation: only the exact expected
            // sequence number actually tears down the connection. A seq that
            // merely falls in-window is challenged rather than trusted, since
            // an off-path attacker can guess a window-sized range far more
            // easily than the one correct number; anything outside the
            // window is an old or spoofed segment and is dropped silently.
            if matches!(s.state, State::SynSent | State::Listen | State::Unused | State::Closed) {
                s.last_error = Some(NetError::Error);
                s.state = State::Closed;
                return Ok(out);
            }
            if seg.seq == s.rcv_nxt {
                s.last_error = Some(NetError::Error);
                s.state = State::Closed;
                return Ok(out);
            }
            if seq_in_window(seg.seq, s.rcv_nxt, s.rcv_wnd) {
                let _ = out.push(SegmentOut {
                    seq: s.snd_nxt,
                    ack: s.rcv_nxt,
                    flags: Flags::ACK,
                    window: s.rcv_wnd,
                    mss: None,
                    payload_from: 0,
                    payload_len: 0,
                });
            }
            return Ok(out);
        }

        match s.state {
            State::SynSent => {
                if seg.flags.ack && seg.ack != s.snd_nxt {
                    let _ = out.push(SegmentOut {
                        seq: seg.ack,
                        ack: 0,
                        flags: Flags::RST,
                        window: 0,
                        mss: None,
                        payload_from: 0,
                        payload_len: 0,
                    });
                    return Ok(out);
                }
                if seg.flags.syn {
                    s.irs = seg.seq;
                    s.rcv_nxt = seg.seq.wrapping_add(1);
                    s.peer_mss = seg.options.mss.unwrap_or(536);
                    if seg.flags.ack {
                        s.snd_una = seg.ack;
                        s.snd_wnd = seg.window as u32;
                        s.snd_wl1 = seg.seq;
                        s.snd_wl2 = seg.ack;
                        s.state = State::Established;
                        s.rto_timer.clear();
                        let _ = out.push(SegmentOut {
                            seq: s.snd_nxt,
                            ack: s.rcv_nxt,
                            flags: Flags::ACK,
                            window: s.rcv_wnd,
                            mss: None,
                            payload_from: 0,
                            payload_len: 0,
                        });
                    } else {
                        s.state = State::SynReceived;
                        let _ = out.push(SegmentOut {
                            seq: s.iss,
                            ack: s.rcv_nxt,
                            flags: Flags::SYN_ACK,
                            window: s.rcv_wnd,
                            mss: Some(s.mss),
                            payload_from: 0,
                            payload_len: 0,
                        });
                    }
                }
                Ok(out)
            }
            State::SynReceived => {
                if seg.flags.ack && seg.ack == s.snd_nxt {
                    s.snd_una = seg.ack;
                    s.snd_wnd = seg.window as u32;
                    s.snd_wl1 = seg.seq;
                    s.snd_wl2 = seg.ack;
                    s.state = State::Established;
                    s.rto_timer.clear();
                }
                Ok(out)
            }
            State::Listen | State::Unused | State::Closed => Ok(out),
            _ => {
                Self::process_established(s, seg, &mut out);
                Ok(out)
            }
        }
    }

    /// Shared data/ACK/FIN processing for every post-handshake state
    /// (Established through TimeWait).
    fn process_established(s: &mut Socket, seg: &segment::Segment<'_>, out: &mut Vec<SegmentOut, 2>) {
        if seg.flags.ack {
            if seq_gt(seg.ack, s.snd_nxt) {
                // ACKs something not yet sent; ignore (RFC 793 §3.9 rule).
            } else if seq_gt(seg.ack, s.snd_una) {
                let acked = seg.ack.wrapping_sub(s.snd_una);
                for _ in 0..acked.min(s.tx_buf.len() as u32) {
                    s.tx_buf.pop_front();
                }
                s.snd_una = seg.ack;
                s.dup_acks = 0;
                if s.recovery == RecoveryMode::FastRecovery {
                    // Only a new ACK covering the segment outstanding when
                    // fast recovery began means the whole flight is repaired;
                    // anything short of that is a partial ACK and recovery
                    // stays engaged.
                    if seq_ge(seg.ack, s.recovery_point) {
                        s.cwnd = s.ssthresh;
                        s.recovery = RecoveryMode::None;
                    }
                } else {
                    s.grow_cwnd(acked);
                }
                if let Some((probed_seq, elapsed)) = s.rtt_probe {
                    if seq_ge(seg.ack, probed_seq) {
                        s.sample_rtt(elapsed.max(1));
                        s.rtt_probe = None;
                    }
                }
                s.reset_retransmit_timer();
                s.retries = 0;
                match s.state {
                    State::FinWait1 if seg.ack == s.snd_nxt => s.state = State::FinWait2,
                    State::Closing if seg.ack == s.snd_nxt => s.state = State::TimeWait,
                    State::LastAck if seg.ack == s.snd_nxt => s.state = State::Closed,
                    _ => {}
                }
            } else if seg.ack == s.snd_una && s.in_flight() > 0 && seg.payload.is_empty() {
                s.dup_acks = s.dup_acks.saturating_add(1);
                if s.dup_acks == 3 && s.recovery == RecoveryMode::None {
                    s.enter_fast_recovery();
                    s.recovery = RecoveryMode::FastRecovery;
                    let n = s.tx_buf.len().min(s.mss.max(1) as usize);
                    let _ = out.push(SegmentOut {
                        seq: s.snd_una,
                        ack: s.rcv_nxt,
                        flags: Flags::ACK,
                        window: s.rcv_wnd,
                        mss: None,
                        payload_from: s.snd_una,
                        payload_len: n,
                    });
                } else if s.dup_acks > 3 && s.recovery == RecoveryMode::FastRecovery {
                    // RFC 5681 §3.2 window inflation: each further duplicate
                    // ACK confirms another segment has left the network, so
                    // cwnd grows to let a new segment take its place.
                    let mss = s.mss.max(1) as u32;
                    s.cwnd = s.cwnd.saturating_add(mss).min(MAX_CWND);
                }
            }
            // RFC 793 §3.9 SND.WND update rule: only apply a window update
            // from a segment at least as new as the last one that set it.
            if seq_lt(s.snd_wl1, seg.seq) || (s.snd_wl1 == seg.seq && seq_le(s.snd_wl2, seg.ack)) {
                s.snd_wnd = seg.window as u32;
                s.snd_wl1 = seg.seq;
                s.snd_wl2 = seg.ack;
            }
        }

        if !seg.payload.is_empty() && seg.seq == s.rcv_nxt {
            let room = s.rx_cap.saturating_sub(s.rx_buf.len());
            let n = seg.payload.len().min(room);
            s.rx_buf.extend(seg.payload[..n].iter().copied());
            s.rcv_nxt = s.rcv_nxt.wrapping_add(n as u32);
            s.rcv_wnd = (s.rx_cap - s.rx_buf.len()).min(u16::MAX as usize) as u16;
        }

        if seg.flags.fin && seg.seq.wrapping_add(seg.payload.len() as u32) == s.rcv_nxt {
            s.rcv_nxt = s.rcv_nxt.wrapping_add(1);
            match s.state {
                State::Established => s.state = State::CloseWait,
                State::FinWait1 => s.state = State::Closing,
                State::FinWait2 => {
                    s.state = State::TimeWait;
                    s.time_wait_timer.start(s_to_ticks(TIME_WAIT_DWELL_S));
                }
                _ => {}
            }
        }

        if !seg.payload.is_empty() || seg.flags.fin || (seg.flags.ack && s.dup_acks > 0) {
            let _ = out.push(SegmentOut {
                seq: s.snd_nxt,
                ack: s.rcv_nxt,
                flags: Flags::ACK,
                window: s.rcv_wnd,
                mss: None,
                payload_from: 0,
                payload_len: 0,
            });
        }
    }

    /// Advance every socket's timers by `ticks`, producing data/retransmit
    /// segments to send this step and freeing any socket whose TIME-WAIT
    /// dwell has elapsed.
    pub fn tick(&mut self, ticks: u32, out: &mut Vec<(usize, SegmentOut), N>) {
        out.clear();
        for idx in 0..self.sockets.len() {
            let s = &mut self.sockets[idx];
            if s.state == State::Unused {
                continue;
            }
            if let Some((_, elapsed)) = s.rtt_probe.as_mut() {
                *elapsed += ticks;
            }
            if s.state == State::TimeWait {
                s.time_wait_timer.advance(ticks);
                if s.time_wait_timer.status() == CountdownStatus::Done {
                    let local = s.local;
                    *s = Socket::blank(local);
                }
                continue;
            }
            s.rto_timer.advance(ticks);
            if s.rto_timer.status() == CountdownStatus::Done {
                if s.retries >= MAX_RETRIES {
                    s.last_error = Some(NetError::Timeout);
                    let local = s.local;
                    *s = Socket::blank(local);
                    continue;
                }
                s.retries += 1;
                s.rto_ticks = (s.rto_ticks * 2).min(MAX_RTO_TICKS);
                s.enter_loss_recovery();
                s.rtt_probe = None; // Karn's algorithm: don't sample a retransmitted segment.
                let n = s.tx_buf.len().min(s.mss.max(1) as usize);
                let (flags, mss) = match s.state {
                    State::SynSent => (Flags::SYN, Some(s.mss)),
                    State::SynReceived => (Flags::SYN_ACK, Some(s.mss)),
                    _ if s.pending_fin && s.tx_buf.is_empty() => (Flags::FIN_ACK, None),
                    _ => (Flags::ACK, None),
                };
                let _ = out.push((
                    idx,
                    SegmentOut { seq: s.snd_una, ack: s.rcv_nxt, flags, window: s.rcv_wnd, mss, payload_from: s.snd_una, payload_len: n },
                ));
                s.rto_timer.start(s.rto_ticks);
                continue;
            }
            if let Some(seg) = Self::drain_send(s) {
                let _ = out.push((idx, seg));
            }
        }
    }

    /// Send any unsent queued bytes (and, once the buffer is drained, the
    /// pending FIN from a prior `close()`) within the allowed send window.
    fn drain_send(s: &mut Socket) -> Option<SegmentOut> {
        let allowed = s.cwnd.min(s.snd_wnd).saturating_sub(s.in_flight());
        let unsent = s.unsent_len();
        if unsent > 0 && allowed > 0 {
            let n = unsent.min(allowed as usize).min(s.mss.max(1) as usize);
            let seq = s.snd_nxt;
            s.snd_nxt = s.snd_nxt.wrapping_add(n as u32);
            if s.rtt_probe.is_none() {
                s.rtt_probe = Some((s.snd_nxt, 0));
            }
            s.reset_retransmit_timer();
            return Some(SegmentOut { seq, ack: s.rcv_nxt, flags: Flags::ACK, window: s.rcv_wnd, mss: None, payload_from: seq, payload_len: n });
        }
        if s.pending_fin && s.unsent_len() == 0 {
            s.pending_fin = false;
            let seq = s.snd_nxt;
            s.snd_nxt = s.snd_nxt.wrapping_add(1);
            s.reset_retransmit_timer();
            return Some(SegmentOut { seq, ack: s.rcv_nxt, flags: Flags::FIN_ACK, window: s.rcv_wnd, mss: None, payload_from: 0, payload_len: 0 });
        }
        None
    }

    pub fn take_error(&mut self, idx: usize) -> Option<NetError> {
        self.sockets.get_mut(idx).and_then(|s| s.last_error.take())
    }
}

fn seq_ge(a: u32, b: u32) -> bool {
    a == b || seq_gt(a, b)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::addr::Ipv4Addr;

    fn cfg() -> TcpConfig {
        TcpConfig { max_sockets: 4, default_mss: 1460, dynamic_port_lo: 49152, dynamic_port_hi: 65535, recv_window: 4096 }
    }

    fn ep(port: u16) -> IpEndpoint {
        IpEndpoint::V4 { addr: Ipv4Addr::new(10, 0, 0, 1), port }
    }

    #[test]
    fn three_way_handshake_completes_active_open() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let idx = t.get_socket(ep(1000)).unwrap();
        let syn = t.connect(idx, ep(80), 1000, 1460).unwrap();
        assert!(syn.flags.syn && !syn.flags.ack);
        assert_eq!(t.state(idx), Some(State::SynSent));

        let synack = segment::Segment {
            src_port: 80,
            dst_port: 1000,
            seq: 5000,
            ack: 1001,
            flags: Flags::SYN_ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options { mss: Some(1460) },
            header_len: 20,
            payload: &[],
        };
        let reply = t.receive(idx, &synack).unwrap();
        assert_eq!(t.state(idx), Some(State::Established));
        assert_eq!(reply.len(), 1);
        assert!(reply[0].flags.ack && !reply[0].flags.syn);
    }

    #[test]
    fn passive_open_spawns_connected_socket_on_syn() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, synack) = t.accept_into(listener, ep(40000), 9000, 1460, 77).unwrap();
        assert_eq!(t.state(listener), Some(State::Listen));
        assert_eq!(t.state(conn), Some(State::SynReceived));
        assert!(synack.flags.syn && synack.flags.ack);
    }

    #[test]
    fn send_then_receive_ack_advances_snd_una_and_cwnd() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        // Complete the handshake.
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        assert_eq!(t.state(conn), Some(State::Established));

        t.send(conn, b"hello").unwrap();
        let mut out: Vec<(usize, SegmentOut), 4> = Vec::new();
        t.tick(1, &mut out);
        assert_eq!(out.len(), 1);
        let data_seg = out[0].1;
        assert_eq!(data_seg.payload_len, 5);

        let mut buf = [0u8; 5];
        let n = t.peek_payload(conn, data_seg.seq, 5, &mut buf);
        assert_eq!(&buf[..n], b"hello");

        let data_ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: data_seg.seq.wrapping_add(5),
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &data_ack).unwrap();
        assert_eq!(t.sockets[conn].snd_una, data_seg.seq.wrapping_add(5));
        assert!(t.sockets[conn].cwnd > Socket::initial_cwnd(1460));
    }

    #[test]
    fn third_duplicate_ack_enters_fast_recovery_with_window_halving() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        assert_eq!(t.sockets[conn].cwnd, Socket::initial_cwnd(1460));
        assert_eq!(t.sockets[conn].snd_wnd, 4096);

        t.send(conn, b"hello").unwrap();
        let mut out: Vec<(usize, SegmentOut), 4> = Vec::new();
        t.tick(1, &mut out);
        let data_seg = out[0].1;

        let dup = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: data_seg.seq, // old ack, i.e. snd_una, repeated
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &dup).unwrap();
        t.receive(conn, &dup).unwrap();
        let reply = t.receive(conn, &dup).unwrap();
        assert_eq!(t.sockets[conn].dup_acks, 3);
        assert_eq!(t.sockets[conn].recovery, RecoveryMode::FastRecovery);
        // min(snd_wnd=4096, cwnd=4380)/2 = 2048, max'd against 2*mss=2920.
        assert_eq!(t.sockets[conn].ssthresh, 2920);
        // ssthresh + 3*mss.
        assert_eq!(t.sockets[conn].cwnd, 2920 + 3 * 1460);
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].payload_len, 5);

        // A 4th duplicate ACK inflates the window by one more MSS.
        t.receive(conn, &dup).unwrap();
        assert_eq!(t.sockets[conn].dup_acks, 4);
        assert_eq!(t.sockets[conn].cwnd, 2920 + 4 * 1460);
    }

    #[test]
    fn dup_ack_counter_saturates_at_255() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        t.send(conn, b"hello").unwrap();
        let mut out: Vec<(usize, SegmentOut), 4> = Vec::new();
        t.tick(1, &mut out);
        let data_seg = out[0].1;

        let dup = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: data_seg.seq,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.sockets[conn].dup_acks = 255;
        t.receive(conn, &dup).unwrap();
        assert_eq!(t.sockets[conn].dup_acks, 255);
    }

    #[test]
    fn rst_with_exact_sequence_aborts_established_connection() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        let rcv_nxt = t.sockets[conn].rcv_nxt;

        let rst = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: rcv_nxt,
            ack: 0,
            flags: Flags::RST,
            window: 0,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        let reply = t.receive(conn, &rst).unwrap();
        assert_eq!(t.state(conn), Some(State::Closed));
        assert_eq!(t.take_error(conn), Some(NetError::Error));
        assert!(reply.is_empty());
    }

    #[test]
    fn rst_with_in_window_sequence_sends_challenge_ack_instead_of_aborting() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        let rcv_nxt = t.sockets[conn].rcv_nxt;

        let rst = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: rcv_nxt.wrapping_add(10), // inside the receive window, not exact
            ack: 0,
            flags: Flags::RST,
            window: 0,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        let reply = t.receive(conn, &rst).unwrap();
        assert_eq!(t.state(conn), Some(State::Established));
        assert_eq!(t.take_error(conn), None);
        assert_eq!(reply.len(), 1);
        assert!(reply[0].flags.ack && !reply[0].flags.rst);
    }

    #[test]
    fn rst_out_of_window_is_dropped_silently() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        let rcv_nxt = t.sockets[conn].rcv_nxt;

        let rst = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: rcv_nxt.wrapping_add(1_000_000), // well outside the window
            ack: 0,
            flags: Flags::RST,
            window: 0,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        let reply = t.receive(conn, &rst).unwrap();
        assert_eq!(t.state(conn), Some(State::Established));
        assert_eq!(t.take_error(conn), None);
        assert!(reply.is_empty());
    }

    #[test]
    fn rst_aborts_connection() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let idx = t.get_socket(ep(1000)).unwrap();
        t.connect(idx, ep(80), 1000, 1460).unwrap();
        let rst = segment::Segment {
            src_port: 80,
            dst_port: 1000,
            seq: 0,
            ack: 0,
            flags: Flags::RST,
            window: 0,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(idx, &rst).unwrap();
        assert_eq!(t.state(idx), Some(State::Closed));
        assert_eq!(t.take_error(idx), Some(NetError::Error));
    }

    #[test]
    fn graceful_close_sequence_reaches_time_wait_then_frees_slot() {
        let mut t: TcpSockets<4> = TcpSockets::new(cfg());
        let listener = t.get_socket(ep(80)).unwrap();
        t.listen(listener).unwrap();
        let (conn, _) = t.accept_into(listener, ep(40000), 0, 1460, 100).unwrap();
        let ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: 101,
            flags: Flags::ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        t.receive(conn, &ack).unwrap();
        t.close(conn).unwrap();
        let mut out: Vec<(usize, SegmentOut), 4> = Vec::new();
        t.tick(1, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].1.flags.fin);

        let fin_ack = segment::Segment {
            src_port: 40000,
            dst_port: 80,
            seq: 1,
            ack: out[0].1.seq.wrapping_add(1),
            flags: Flags::FIN_ACK,
            window: 4096,
            urgent_ptr: 0,
            options: segment::Options::NONE,
            header_len: 20,
            payload: &[],
        };
        let reply = t.receive(conn, &fin_ack).unwrap();
        assert_eq!(t.state(conn), Some(State::TimeWait));
        assert_eq!(reply.len(), 1);

        t.tick(s_to_ticks(TIME_WAIT_DWELL_S), &mut out);
        assert_eq!(t.state(conn), Some(State::Unused));
    }
}
