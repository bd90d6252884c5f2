use crate::Bitfield;

/// The mutable flags and assignment tracked by one peer session, per
/// spec's §4.2 state variables. `available_pieces` of `None` means no
/// bitfield/have has ever been observed for this peer; the scheduler
/// treats that as "assume the peer has everything" until proven
/// otherwise (spec's Open Question, kept permissive).
#[derive(Debug)]
pub struct SessionState {
    pub peer_choking: bool,
    pub self_interested: bool,
    pub available_pieces: Option<Bitfield>,
    pub current_request: Option<(usize, u32)>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            peer_choking: true,
            self_interested: false,
            available_pieces: None,
            current_request: None,
        }
    }
}
