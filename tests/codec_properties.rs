use function_evaluator::codec::generics::{list_of, map_of, pair_of, reference};
use function_evaluator::codec::value::{Value, ZMap};
use function_evaluator::codec::Codec;
use proptest::prelude::*;

fn strings() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("\\PC{0,12}", 0..6)
}

/// Strings, booleans and string/boolean pairs, mixed.
fn mixed_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z]{0,6}".prop_map(Value::str),
        any::<bool>().prop_map(Value::Bool),
        ("[a-z]{0,4}", any::<bool>())
            .prop_map(|(a, b)| Value::pair(Value::str(a), Value::Bool(b))),
    ]
}

/// A list and a shuffled copy of it.
fn list_and_shuffle() -> impl Strategy<Value = (Vec<Value>, Vec<Value>)> {
    prop::collection::vec(mixed_value(), 0..8)
        .prop_flat_map(|items| (Just(items.clone()), Just(items).prop_shuffle()))
}

proptest! {
    #[test]
    fn strings_survive_a_typed_round_trip(s in "\\PC*") {
        let codec = Codec::new();
        let wire = codec.encode(&Value::str(s.clone()), &reference("Z6")).unwrap();
        prop_assert_eq!(codec.decode(&wire).unwrap(), Value::str(s));
    }

    #[test]
    fn booleans_survive_inference(b in any::<bool>()) {
        let codec = Codec::new();
        let wire = codec.encode_any(&Value::Bool(b)).unwrap();
        prop_assert_eq!(codec.decode(&wire).unwrap(), Value::Bool(b));
    }

    #[test]
    fn string_lists_keep_order(items in strings()) {
        let codec = Codec::new();
        let value = Value::List(items.iter().cloned().map(Value::str).collect());
        let wire = codec.encode(&value, &list_of(&reference("Z6"))).unwrap();
        prop_assert_eq!(codec.decode(&wire).unwrap(), value);
    }

    #[test]
    fn inferred_encoding_is_stable(items in strings()) {
        let codec = Codec::new();
        let value = Value::List(items.into_iter().map(Value::str).collect());
        let first = codec.encode_any(&value).unwrap();
        let second = codec.encode_any(&codec.decode(&first).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn maps_keep_their_entries(entries in prop::collection::btree_map("[a-z]{1,6}", "\\PC{0,8}", 0..5)) {
        let codec = Codec::new();
        let mut map = ZMap::new();
        for (k, v) in &entries {
            map.insert(Value::str(k.clone()), Value::str(v.clone()));
        }
        let expected = map_of(&reference("Z6"), &reference("Z6"));
        let wire = codec.encode(&Value::Map(map), &expected).unwrap();

        let Value::Map(decoded) = codec.decode(&wire).unwrap() else {
            return Err(TestCaseError::fail("map decoded to another shape"));
        };
        prop_assert_eq!(decoded.len(), entries.len());
        for (k, v) in &entries {
            prop_assert_eq!(decoded.get(&Value::str(k.clone())), Some(&Value::str(v.clone())));
        }
    }

    #[test]
    fn pairs_keep_both_halves(a in "\\PC{0,8}", b in any::<bool>()) {
        let codec = Codec::new();
        let expected = pair_of(&reference("Z6"), &reference("Z40"));
        let wire = codec
            .encode(&Value::pair(Value::str(a.clone()), Value::Bool(b)), &expected)
            .unwrap();
        let Value::Pair(pair) = codec.decode(&wire).unwrap() else {
            return Err(TestCaseError::fail("pair decoded to another shape"));
        };
        prop_assert_eq!(pair.k1.as_ref(), &Value::str(a));
        prop_assert_eq!(pair.k2.as_ref(), &Value::Bool(b));
    }

    #[test]
    fn inferred_list_type_ignores_element_order((items, shuffled) in list_and_shuffle()) {
        let codec = Codec::new();
        let first = codec.encode_any(&Value::List(items)).unwrap();
        let second = codec.encode_any(&Value::List(shuffled)).unwrap();
        prop_assert_eq!(&first["Z1K1"], &second["Z1K1"]);
    }

    #[test]
    fn inferred_map_type_ignores_entry_order((values, shuffled) in list_and_shuffle()) {
        let codec = Codec::new();
        // Key each value by its own rendering so both maps hold the same entries.
        let build = |values: &[Value]| -> ZMap {
            values
                .iter()
                .map(|v| (Value::str(format!("{:?}", v)), v.clone()))
                .collect()
        };
        let first = codec.encode_any(&Value::Map(build(&values))).unwrap();
        let second = codec.encode_any(&Value::Map(build(&shuffled))).unwrap();
        prop_assert_eq!(&first["Z1K1"], &second["Z1K1"]);
    }
}
