
use bytes::BytesMut;
use std::{mem, str};
use tokio_util::codec::Decoder;

use crate::{
    types::{
        error::{Error, Result},
        Msg, ServerControl, ServerMessage, Sid, Subject,
    },
    util,
};

enum State {
    // Reading and parsing a control line
    ReadControl,
    // Reading the payload of a `MSG`
    ReadMsgPayload {
        subject: Subject,
        sid: Sid,
        reply_to: Option<Subject>,
        len: usize,
    },
}

/// A decoder producing [`ServerMessage`]s from the raw byte stream
///
/// The decoded item is itself a `Result` so that a single malformed line surfaces as an error
/// without terminating the underlying stream.
pub(crate) struct Codec {
    // Index at which to resume scanning for a newline when reading a control line. Avoids
    // rescanning the whole buffer when a line arrives in multiple reads.
    next_index: usize,
    state: State,
}

impl Codec {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            state: State::ReadControl,
        }
    }

    fn decode_impl(&mut self, buf: &mut BytesMut) -> Result<ServerMessage> {
        match &mut self.state {
            State::ReadMsgPayload { len, .. } => {
                let len = *len;
                let terminator_len = util::MESSAGE_TERMINATOR.len();
                if buf.len() < len + terminator_len {
                    return Err(Error::NotEnoughData);
                }
                let line = buf.split_to(len + terminator_len);
                let payload = &line[..len];
                let terminator = &line[len..];
                if terminator != util::MESSAGE_TERMINATOR.as_bytes() {
                    // The payload is not correctly terminated. Try to recover by scanning for
                    // the next control line.
                    self.state = State::ReadControl;
                    return Err(Error::InvalidTerminator(terminator.to_vec()));
                }
                let old_state = mem::replace(&mut self.state, State::ReadControl);
                if let State::ReadMsgPayload {
                    subject,
                    sid,
                    reply_to,
                    ..
                } = old_state
                {
                    return Ok(ServerMessage::Msg(Msg::new(
                        subject,
                        sid,
                        reply_to,
                        payload.to_vec(),
                    )));
                }
                // We matched on `ReadMsgPayload` above
                unreachable!()
            }
            State::ReadControl => {
                let newline_offset = buf[self.next_index..].iter().position(|b| *b == b'\n');
                match newline_offset {
                    Some(offset) => {
                        let newline_index = offset + self.next_index;
                        self.next_index = 0;
                        let line = buf.split_to(newline_index + 1);
                        let line = str::from_utf8(&line)
                            .map_err(|_| Error::InvalidServerControl(String::from_utf8_lossy(&line).into_owned()))?;
                        let control_line = line.parse()?;
                        if let ServerControl::Msg {
                            subject,
                            sid,
                            reply_to,
                            len,
                        } = control_line
                        {
                            let len = len as usize;
                            self.state = State::ReadMsgPayload {
                                subject,
                                sid,
                                reply_to,
                                len,
                            };
                            // Make room for the payload and immediately try to read it
                            buf.reserve(len + util::MESSAGE_TERMINATOR.len());
                            self.decode_impl(buf)
                        } else {
                            Ok(control_line.into())
                        }
                    }
                    None => {
                        // No full line yet. The next call resumes scanning at the current end
                        // of the buffer.
                        self.next_index = buf.len();
                        Err(Error::NotEnoughData)
                    }
                }
            }
        }
    }
}

impl Decoder for Codec {
    type Error = Error;
    type Item = Result<ServerMessage>;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        let result = self.decode_impl(buf);
        if let Err(Error::NotEnoughData) = result {
            return Ok(None);
        }
        Ok(Some(result))
    }
}
