#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(topic) = std::str::from_utf8(data) else {
        return;
    };

    // The vin must always come from the path, never from outside it
    if let Some(command) = evbridge::topics::CommandTopic::parse("saic", topic) {
        assert!(topic.contains(&command.vin));
    }
    let _ = evbridge::topics::vin_from_topic("saic", topic);
    let sanitized = evbridge::topics::sanitize(topic);
    assert!(!sanitized.contains(['+', '#', '*', '>', '$']));
});
