use chrono::{NaiveTime, Utc};
use kaivalya_booking::{CheckoutSession, ValidationError, WizardError, WizardStep};
use kaivalya_catalog::{MembershipPlan, Professional, RateRefresh, ServiceOffering};
use kaivalya_core::preferences::PreferenceStore;
use kaivalya_order::testing::{ScriptedSdk, SdkScript};
use kaivalya_order::CheckoutOutcome;
use kaivalya_store::{CheckoutState, FilePreferenceStore, GatewaySdks};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(dir: &Path, base_url: &str) {
    let config = format!(
        r#"
[backend]
base_url = "{base_url}"
request_timeout_secs = 7

[currency]
base_code = "AUD"
default_code = "AUD"
storage_key = "selectedCurrency"
rates_max_age_hours = 24

[checkout]
platform_fee = 5
min_reason_chars = 20
merchant_name = "Kaivalya Yoga"
country_code = "IN"

[storage]
preferences_path = '{prefs}'
events_path = '{events}'
"#,
        base_url = base_url,
        prefs = dir.join("data").join("preferences.json").display(),
        events = dir.join("data").join("checkout-events.jsonl").display(),
    );
    fs::write(dir.join("default.toml"), config).unwrap();
}

fn sdks() -> (Arc<ScriptedSdk>, GatewaySdks) {
    let sdk = Arc::new(ScriptedSdk::new(SdkScript::Pay));
    let sdks = GatewaySdks {
        domestic: sdk.clone(),
        international: sdk.clone(),
    };
    (sdk, sdks)
}

#[tokio::test]
async fn test_loaded_config_reaches_every_component() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "http://127.0.0.1:9");
    let (_sdk, sdks) = sdks();

    let state = CheckoutState::bootstrap(dir.path(), sdks).unwrap();
    assert_eq!(state.config.coordinator_settings().request_timeout, Duration::from_secs(7));
    assert_eq!(state.pricing().config().platform_fee, dec!(5));

    // Currency selection lands in the configured preferences file
    state.currency.select("INR").unwrap();
    let prefs = dir.path().join("data").join("preferences.json");
    assert_eq!(state.preferences.path(), prefs.as_path());
    let reopened = FilePreferenceStore::open(&prefs).unwrap();
    assert_eq!(reopened.get("selectedCurrency").unwrap().as_deref(), Some("INR"));

    // The wizard uses the configured minimum reason length
    let mut wizard = state.booking_wizard(
        Professional {
            id: "pro-7".into(),
            name: "Meera Iyer".into(),
        },
        vec![ServiceOffering {
            id: "42".into(),
            name: "Vinyasa Flow".into(),
            description: None,
            duration_minutes: 60,
            price: dec!(84),
        }],
    );
    wizard.open();
    wizard.select_service("42").unwrap();
    wizard.next().unwrap();
    wizard.select_date(Utc::now().date_naive().succ_opt().unwrap()).unwrap();
    wizard.select_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap()).unwrap();
    assert_eq!(wizard.next().unwrap(), WizardStep::Details);
    wizard.set_reason("Neck tension").unwrap();
    assert!(matches!(
        wizard.next(),
        Err(WizardError::Validation(ValidationError::ReasonTooShort { min: 20, actual: 12 }))
    ));
}

#[tokio::test]
async fn test_membership_purchase_writes_configured_event_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/payments/razorpay/create"))
        .and(body_partial_json(json!({ "currency": "INR", "country_code": "IN" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "order_M1",
            "key_id": "rzp_test_key",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/payments/razorpay/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "payment_id": 88 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/memberships/purchase"))
        .and(body_json(json!({ "package_type": "monthly", "payment_id": 88 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 5, "confirmation_number": "KV-M-0088" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let (sdk, sdks) = sdks();
    let state = CheckoutState::bootstrap(dir.path(), sdks).unwrap();

    let pricing = state.pricing();
    let session = CheckoutSession::new();
    let outcome = state
        .purchase(&pricing)
        .membership(MembershipPlan::Monthly, &session)
        .await
        .unwrap();
    match outcome {
        CheckoutOutcome::Completed(confirmation) => {
            assert_eq!(confirmation.confirmation_number, "KV-M-0088");
            assert_eq!(confirmation.target_reference, "5");
        }
        other => panic!("membership purchase did not complete: {:?}", other),
    }
    assert_eq!(sdk.opened().len(), 1);

    let events_path = dir.path().join("data").join("checkout-events.jsonl");
    assert_eq!(state.events.path(), events_path.as_path());
    let kinds: Vec<_> = state
        .events
        .read_all()
        .await
        .unwrap()
        .iter()
        .map(|record| record.event.kind())
        .collect();
    assert_eq!(kinds, vec!["ORDER_CREATED", "ORDER_COMPLETED"]);
}

#[tokio::test]
async fn test_bundled_rates_are_refreshed_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    write_config(dir.path(), &server.uri());
    let (_sdk, sdks) = sdks();
    let state = CheckoutState::bootstrap(dir.path(), sdks).unwrap();

    let rates: HashMap<String, Decimal> = state
        .currency
        .registry()
        .codes()
        .into_iter()
        .map(|code| (code.to_string(), state.currency.convert(Decimal::ONE, code).unwrap()))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/exchange-rates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "base": "AUD",
            "rates": rates,
            "updated_at": Utc::now().to_rfc3339(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Bundled rates are older than the configured 24 hours
    assert_eq!(state.refresh_rates().await, RateRefresh::Replaced);
    assert_eq!(state.currency.rates().pivot(), "AUD");
    // Fresh now, so no second fetch
    assert_eq!(state.refresh_rates().await, RateRefresh::Fresh);
}
