pub use crate::config::TbConfig;
pub use crate::executor::{JoinHandle, Task};
pub use crate::signal::{ObjectKind, SimObject};
pub use crate::sim_if::{SimIf, TimeUnit, SIM_IF};
pub use crate::tb_obj::TbObj;
pub use crate::test::{TbTests, Test, TestFn, TestOutcome};
pub use crate::trigger::{EdgeKind, Trigger};
pub use crate::{fail_test, pass_test, testbench, utils};
pub use crate::{SimpleResult, TbError, TbResult, Val};
pub use futures::future::FutureExt;
