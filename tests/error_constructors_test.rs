use evse_load_balancer::error::BalancerError;

#[test]
fn error_constructors_group_1() {
    assert!(matches!(
        BalancerError::config("x"),
        BalancerError::Config { .. }
    ));
    assert!(matches!(
        BalancerError::charger("x"),
        BalancerError::Charger { .. }
    ));
}

#[test]
fn error_constructors_group_2() {
    let ser = BalancerError::Serialization {
        message: "s".into(),
    };
    assert!(matches!(ser, BalancerError::Serialization { .. }));
    assert!(matches!(BalancerError::io("x"), BalancerError::Io { .. }));
    assert!(matches!(
        BalancerError::validation("f", "m"),
        BalancerError::Validation { .. }
    ));
}

#[test]
fn json_errors_convert() {
    let err: BalancerError = serde_json::from_str::<u32>("nope").unwrap_err().into();
    assert!(matches!(err, BalancerError::Serialization { .. }));
}

#[test]
fn display_messages() {
    let e = BalancerError::validation("field", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));
    assert_eq!(
        format!("{}", BalancerError::charger("garage offline")),
        "Charger error: garage offline"
    );
}
