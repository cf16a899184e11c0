use crate::transport::DeliveryProperties;
use crate::{DeliveryMode, Header, Headers, OutboundMessage};
use lapin::BasicProperties;
use lapin::types::{AMQPValue, FieldTable, ShortString};

/// Converts [`Headers`] into a [`FieldTable`].
pub(crate) fn field_table(headers: &Headers) -> FieldTable {
    let mut table = FieldTable::default();

    for (key, header) in headers {
        table.insert(ShortString::from(key.as_str()), amqp_value(header));
    }

    table
}

/// Converts a [`FieldTable`] into [`Headers`], skipping values that no
/// [`Header`] variant can represent (nested tables, arrays, floats, and
/// wide integers that do not fit).
pub(crate) fn headers(table: &FieldTable) -> Headers {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| Some((key.as_str().to_string(), header(value)?)))
        .collect()
}

fn amqp_value(header: &Header) -> AMQPValue {
    match header {
        Header::Boolean(b) => AMQPValue::Boolean(*b),
        Header::Int(i) => AMQPValue::LongInt(*i),
        Header::UInt(u) => AMQPValue::LongUInt(*u),
        Header::String(s) => AMQPValue::LongString(s.as_bytes().into()),
    }
}

fn header(value: &AMQPValue) -> Option<Header> {
    match value {
        AMQPValue::Boolean(b) => Some(Header::Boolean(*b)),
        AMQPValue::ShortShortInt(i) => Some(Header::Int(i32::from(*i))),
        AMQPValue::ShortInt(i) => Some(Header::Int(i32::from(*i))),
        AMQPValue::LongInt(i) => Some(Header::Int(*i)),
        AMQPValue::LongLongInt(i) => i32::try_from(*i).ok().map(Header::Int),
        AMQPValue::ShortShortUInt(u) => Some(Header::UInt(u32::from(*u))),
        AMQPValue::ShortUInt(u) => Some(Header::UInt(u32::from(*u))),
        AMQPValue::LongUInt(u) => Some(Header::UInt(*u)),
        AMQPValue::ShortString(s) => Some(Header::String(s.as_str().to_string())),
        AMQPValue::LongString(s) => Some(Header::String(
            String::from_utf8_lossy(s.as_bytes()).into_owned(),
        )),
        _ => None,
    }
}

/// Composes the AMQP properties of an outgoing message.
pub(crate) fn basic_properties(message: &OutboundMessage) -> BasicProperties {
    let mut properties =
        BasicProperties::default().with_delivery_mode(message.delivery_mode().amqp_value());

    if !message.headers().is_empty() {
        properties = properties.with_headers(field_table(message.headers()));
    }

    if let Some(content_type) = message.content_type() {
        properties = properties.with_content_type(ShortString::from(content_type));
    }

    if let Some(content_encoding) = message.content_encoding() {
        properties = properties.with_content_encoding(ShortString::from(content_encoding));
    }

    if let Some(correlation_id) = message.correlation_id() {
        properties = properties.with_correlation_id(ShortString::from(correlation_id));
    }

    if let Some(message_id) = message.message_id() {
        properties = properties.with_message_id(ShortString::from(message_id));
    }

    properties
}

/// Extracts the properties of an incoming delivery.
pub(crate) fn delivery_properties(properties: &BasicProperties) -> DeliveryProperties {
    let short = |value: &Option<ShortString>| value.as_ref().map(|s| s.as_str().to_string());

    DeliveryProperties {
        delivery_mode: properties.delivery_mode().map(DeliveryMode::from),
        headers: properties.headers().as_ref().map(headers).unwrap_or_default(),
        content_type: short(properties.content_type()),
        content_encoding: short(properties.content_encoding()),
        correlation_id: short(properties.correlation_id()),
        message_id: short(properties.message_id()),
        reply_to: short(properties.reply_to()),
        priority: *properties.priority(),
        timestamp: *properties.timestamp(),
    }
}
