//! Telnet option negotiation filter.
//!
//! Separates application bytes from `IAC` command sequences. State is
//! carried across calls, so a sequence split over two TCP reads is still
//! recognised. Every option request gets a refusal, except the two a
//! remote shell needs to behave like a plain byte pipe.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Verb(u8),
    Sb,
    SbIac,
}

#[derive(Debug, Default)]
pub struct OptionFilter {
    state: State,
}

impl OptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `input`, appending payload bytes to `data` and negotiation
    /// replies to `replies`.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                // NUL padding after a bare CR.
                (State::Data, 0) => State::Data,
                (State::Data, b) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, verb @ (DO | DONT | WILL | WONT)) => State::Verb(verb),
                (State::Iac, SB) => State::Sb,
                // NOP, GA, AYT and friends carry no option byte.
                (State::Iac, _) => State::Data,
                (State::Verb(verb), option) => {
                    respond(verb, option, replies);
                    State::Data
                }
                (State::Sb, IAC) => State::SbIac,
                (State::Sb, _) => State::Sb,
                (State::SbIac, SE) => State::Data,
                (State::SbIac, _) => State::Sb,
            };
        }
    }
}

fn respond(verb: u8, option: u8, replies: &mut Vec<u8>) {
    match verb {
        DO => replies.extend_from_slice(&[IAC, WONT, option]),
        WILL if option == OPT_ECHO || option == OPT_SGA => {
            replies.extend_from_slice(&[IAC, DO, option])
        }
        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
        // DONT / WONT acknowledge a state we already assume.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut OptionFilter, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::new();
        let mut replies = Vec::new();
        filter.feed(input, &mut data, &mut replies);
        (data, replies)
    }

    #[test]
    fn plain_bytes_pass_through() {
        let mut f = OptionFilter::new();
        let (data, replies) = run(&mut f, b"root@dut:/# ");
        assert_eq!(data, b"root@dut:/# ");
        assert!(replies.is_empty());
    }

    #[test]
    fn do_is_refused_with_wont() {
        let mut f = OptionFilter::new();
        let (data, replies) = run(&mut f, &[IAC, DO, 24, b'x']);
        assert_eq!(data, b"x");
        assert_eq!(replies, vec![IAC, WONT, 24]);
    }

    #[test]
    fn will_echo_and_sga_accepted_others_refused() {
        let mut f = OptionFilter::new();
        let (_, replies) = run(&mut f, &[IAC, WILL, OPT_ECHO, IAC, WILL, OPT_SGA, IAC, WILL, 31]);
        assert_eq!(
            replies,
            vec![IAC, DO, OPT_ECHO, IAC, DO, OPT_SGA, IAC, DONT, 31]
        );
    }

    #[test]
    fn escaped_iac_is_data() {
        let mut f = OptionFilter::new();
        let (data, _) = run(&mut f, &[b'a', IAC, IAC, b'b']);
        assert_eq!(data, vec![b'a', IAC, b'b']);
    }

    #[test]
    fn subnegotiation_is_stripped() {
        let mut f = OptionFilter::new();
        let (data, replies) = run(&mut f, &[b'a', IAC, SB, 24, 1, IAC, SE, b'b']);
        assert_eq!(data, b"ab");
        assert!(replies.is_empty());
    }

    #[test]
    fn sequence_split_across_reads() {
        let mut f = OptionFilter::new();
        let (d1, r1) = run(&mut f, &[b'o', b'k', IAC]);
        let (d2, r2) = run(&mut f, &[DO]);
        let (d3, r3) = run(&mut f, &[1, b'\r', 0, b'\n']);
        assert_eq!(d1, b"ok");
        assert!(r1.is_empty() && r2.is_empty() && d2.is_empty());
        assert_eq!(d3, b"\r\n");
        assert_eq!(r3, vec![IAC, WONT, 1]);
    }
}
