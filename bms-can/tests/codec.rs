//! Encode/decode over every message and multiplexed group of the fixture DBC

use std::collections::BTreeSet;
use std::path::PathBuf;

use bms_can::signals::{MultiplexRole, SignalDefinition};
use bms_can::{Codec, FieldMap, SignalValue};

fn codec() -> Codec {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/bms.dbc");
    Codec::load(&path).unwrap()
}

#[derive(Clone, Copy)]
enum End {
    Low,
    High,
}

/// A value at one end of the signal's range, as a label where one exists
fn value_at(signal: &SignalDefinition, end: End) -> SignalValue {
    if let Some(choices) = &signal.choices {
        let (_, label) = match end {
            End::Low => &choices[0],
            End::High => &choices[choices.len() - 1],
        };
        return SignalValue::Label(label.clone());
    }
    match (signal.has_range(), end) {
        (true, End::Low) => SignalValue::Integer(signal.min as i64),
        (true, End::High) => SignalValue::Integer(signal.max as i64),
        (false, End::Low) => SignalValue::Integer(0),
        (false, End::High) => SignalValue::Integer(1),
    }
}

/// Field map covering one group; `None` for messages without a selector
fn group_fields(codec: &Codec, message: &str, group: Option<u64>, end: End) -> FieldMap {
    let message = codec.database().get_message_by_name(message).unwrap();
    let mut fields = FieldMap::new();
    for signal in message.signals_for(group) {
        let value = match (signal.multiplex, group) {
            (MultiplexRole::Selector, Some(selector)) => match signal.choice_label(selector as i64) {
                Some(label) => SignalValue::Label(label.to_string()),
                None => SignalValue::Integer(selector as i64),
            },
            _ => value_at(signal, end),
        };
        fields.insert(signal.name.clone(), value);
    }
    fields
}

#[test]
fn test_every_group_round_trips() {
    let codec = codec();
    let mut checked = 0;

    for message in codec.database().messages() {
        let groups: Vec<Option<u64>> = if message.is_multiplexed() {
            let selectors: BTreeSet<u64> = message
                .signals
                .iter()
                .filter_map(|s| match s.multiplex {
                    MultiplexRole::Selected(v) => Some(v),
                    _ => None,
                })
                .collect();
            selectors.into_iter().map(Some).collect()
        } else {
            vec![None]
        };

        for group in groups {
            for end in [End::Low, End::High] {
                let fields = group_fields(&codec, &message.name, group, end);
                let data = codec.encode(&message.name, &fields, true).unwrap();
                assert_eq!(data.len(), message.size, "{}", message.name);

                let decoded = codec.decode(message.id, &data).unwrap();
                assert_eq!(decoded.name(), message.name);
                assert_eq!(decoded.view.selector(), group);
                assert_eq!(decoded.fields(), &fields, "{} group {:?}", message.name, group);
                checked += 1;
            }
        }
    }

    // 528, 771 and 860 plus six f_Debug and two f_DebugResponse groups
    assert_eq!(checked, 2 * 11);
}

#[test]
fn test_group_names() {
    let codec = codec();
    let fields = group_fields(&codec, "f_DebugResponse", Some(5), End::High);
    let data = codec.encode("f_DebugResponse", &fields, true).unwrap();
    assert_eq!(
        codec.decode(769, &data).unwrap().group_name(),
        "f_DebugResponse_Mux_5"
    );

    let fields = group_fields(&codec, "CurrentSensor_Current", None, End::Low);
    let data = codec.encode("CurrentSensor_Current", &fields, true).unwrap();
    assert_eq!(
        codec.decode(860, &data).unwrap().group_name(),
        "CurrentSensor_Current"
    );
}
