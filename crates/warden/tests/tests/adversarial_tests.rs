#[path = "adversarial/replay.rs"]
mod replay;

#[path = "adversarial/tampering.rs"]
mod tampering;

#[path = "adversarial/packages.rs"]
mod packages;

#[path = "adversarial/routing.rs"]
mod routing;
