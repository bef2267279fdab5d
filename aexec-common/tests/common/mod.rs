pub mod fixtures;
pub mod logging;

pub use fakes::{FakeRelay, FakeToolchain, RelayLog};
pub use fixtures::{TestPackage, test_config};
pub use logging::init_test_logging;
