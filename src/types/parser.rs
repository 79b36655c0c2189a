//! Parsers for the control lines sent by a server
//!
//! Operation names and error phrases are matched case insensitively. An unrecognized `-ERR`
//! phrase is not a parse failure, it is captured as [`ProtocolError::Unknown`].


use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_until},
    character::complete::{digit1, space1},
    combinator::{all_consuming, cut, map_res, opt, value},
    multi::separated_list1,
    sequence::delimited,
    IResult,
};
use std::str::FromStr;

use crate::{
    types::{
        error::{Error, Result},
        Info, ProtocolError, ServerControl, Sid, Subject,
    },
    util,
};

impl FromStr for ServerControl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, control) = all_consuming(control_line)(s)
            .map_err(|_| Error::InvalidServerControl(String::from(s)))?;
        Ok(control)
    }
}

impl FromStr for Subject {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, subject) =
            all_consuming(subject)(s).map_err(|_| Error::InvalidSubject(String::from(s)))?;
        Ok(subject)
    }
}

fn control_line(input: &str) -> IResult<&str, ServerControl> {
    let (input, control) = alt((info, msg, ping, pong, plus_ok, minus_err))(input)?;
    let (input, _) = tag(util::MESSAGE_TERMINATOR)(input)?;
    Ok((input, control))
}

fn info_after_op_name(input: &str) -> IResult<&str, Info> {
    let (input, _) = space1(input)?;
    map_res(take_until(util::MESSAGE_TERMINATOR), serde_json::from_str)(input)
}

fn info(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::INFO_OP_NAME)(input)?;
    let (input, info) = cut(info_after_op_name)(input)?;
    Ok((input, ServerControl::Info(info)))
}

fn token(input: &str) -> IResult<&str, &str> {
    alt((
        is_not(util::SUBJECT_TOKEN_INVALID_CHARACTERS),
        tag(util::SUBJECT_WILDCARD),
    ))(input)
}

fn trailing_full_wildcard(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag(util::SUBJECT_TOKEN_DELIMITER)(input)?;
    tag(util::SUBJECT_FULL_WILDCARD)(input)
}

// The subject consisting solely of the full wildcard token
fn full_wildcard_subject(input: &str) -> IResult<&str, Subject> {
    let (input, _) = tag(util::SUBJECT_FULL_WILDCARD)(input)?;
    let subject = Subject {
        tokens: Vec::new(),
        full_wildcard: true,
    };
    Ok((input, subject))
}

fn tokens_subject(input: &str) -> IResult<&str, Subject> {
    let (input, tokens) = separated_list1(tag(util::SUBJECT_TOKEN_DELIMITER), token)(input)?;
    let (input, full_wildcard) = opt(trailing_full_wildcard)(input)?;
    let subject = Subject {
        tokens: tokens.iter().map(|s| String::from(*s)).collect(),
        full_wildcard: full_wildcard.is_some(),
    };
    Ok((input, subject))
}

fn subject(input: &str) -> IResult<&str, Subject> {
    alt((full_wildcard_subject, tokens_subject))(input)
}

fn reply_to(input: &str) -> IResult<&str, Subject> {
    let (input, subject) = subject(input)?;
    let (input, _) = space1(input)?;
    Ok((input, subject))
}

fn msg_after_op_name(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = space1(input)?;
    let (input, subject) = subject(input)?;
    let (input, _) = space1(input)?;
    // The protocol allows any ASCII string as a subscription ID, but this client only ever
    // generates numeric IDs
    let (input, sid) = map_res(digit1, |s: &str| s.parse::<Sid>())(input)?;
    let (input, _) = space1(input)?;
    let (input, reply_to) = opt(reply_to)(input)?;
    let (input, len) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;
    Ok((
        input,
        ServerControl::Msg {
            subject,
            sid,
            reply_to,
            len,
        },
    ))
}

fn msg(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::MSG_OP_NAME)(input)?;
    cut(msg_after_op_name)(input)
}

fn ping(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::PING_OP_NAME)(input)?;
    Ok((input, ServerControl::Ping))
}

fn pong(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::PONG_OP_NAME)(input)?;
    Ok((input, ServerControl::Pong))
}

fn plus_ok(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::OK_OP_NAME)(input)?;
    Ok((input, ServerControl::Ok))
}

fn simple_protocol_err(input: &str) -> IResult<&str, ProtocolError> {
    alt((
        value(
            ProtocolError::UnknownProtocolOperation,
            tag_no_case(util::UNKNOWN_PROTOCOL_OPERATION),
        ),
        value(
            ProtocolError::AttemptedToConnectToRoutePort,
            tag_no_case(util::ATTEMPTED_TO_CONNECT_TO_ROUTE_PORT),
        ),
        value(
            ProtocolError::AuthorizationViolation,
            tag_no_case(util::AUTHORIZATION_VIOLATION),
        ),
        value(
            ProtocolError::AuthorizationTimeout,
            tag_no_case(util::AUTHORIZATION_TIMEOUT),
        ),
        value(
            ProtocolError::InvalidClientProtocol,
            tag_no_case(util::INVALID_CLIENT_PROTOCOL),
        ),
        value(
            ProtocolError::MaximumControlLineExceeded,
            tag_no_case(util::MAXIMUM_CONTROL_LINE_EXCEEDED),
        ),
        value(ProtocolError::ParserError, tag_no_case(util::PARSER_ERROR)),
        value(
            ProtocolError::SecureConnectionTlsRequired,
            tag_no_case(util::SECURE_CONNECTION_TLS_REQUIRED),
        ),
        value(
            ProtocolError::StaleConnection,
            tag_no_case(util::STALE_CONNECTION),
        ),
        value(
            ProtocolError::MaximumConnectionsExceeded,
            tag_no_case(util::MAXIMUM_CONNECTIONS_EXCEEDED),
        ),
        value(ProtocolError::SlowConsumer, tag_no_case(util::SLOW_CONSUMER)),
        value(
            ProtocolError::MaximumPayloadViolation,
            tag_no_case(util::MAXIMUM_PAYLOAD_VIOLATION),
        ),
        value(
            ProtocolError::InvalidSubject,
            tag_no_case(util::INVALID_SUBJECT),
        ),
    ))(input)
}

fn permissions_violation_for_subscription(input: &str) -> IResult<&str, ProtocolError> {
    let (input, _) = tag_no_case(util::PERMISSIONS_VIOLATION_FOR_SUBSCRIPTION)(input)?;
    let (input, _) = space1(input)?;
    let (input, subject) = subject(input)?;
    Ok((
        input,
        ProtocolError::PermissionsViolationForSubscription(subject),
    ))
}

fn permissions_violation_for_publish(input: &str) -> IResult<&str, ProtocolError> {
    let (input, _) = tag_no_case(util::PERMISSIONS_VIOLATION_FOR_PUBLISH)(input)?;
    let (input, _) = space1(input)?;
    let (input, subject) = subject(input)?;
    Ok((input, ProtocolError::PermissionsViolationForPublish(subject)))
}

fn known_protocol_err(input: &str) -> IResult<&str, ProtocolError> {
    delimited(
        tag("'"),
        alt((
            simple_protocol_err,
            permissions_violation_for_subscription,
            permissions_violation_for_publish,
        )),
        tag("'"),
    )(input)
}

// Everything up to the line terminator, with any surrounding quotes stripped
fn unknown_protocol_err(input: &str) -> IResult<&str, ProtocolError> {
    let (input, text) = take_until(util::MESSAGE_TERMINATOR)(input)?;
    Ok((
        input,
        ProtocolError::Unknown(String::from(text.trim_matches('\''))),
    ))
}

fn minus_err_after_op_name(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = space1(input)?;
    let (input, e) = alt((known_protocol_err, unknown_protocol_err))(input)?;
    Ok((input, ServerControl::Err(e)))
}

fn minus_err(input: &str) -> IResult<&str, ServerControl> {
    let (input, _) = tag_no_case(util::ERR_OP_NAME)(input)?;
    cut(minus_err_after_op_name)(input)
}
