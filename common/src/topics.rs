pub const TOPIC_CONTROLLER_STATE: &str = "climate/controller/state";

pub fn room_decision_topic(room_id: &str) -> String {
    format!("climate/{room_id}/decision")
}
