pub mod common {
    pub mod address;
    pub mod cmd_defs;
}

pub mod gear {
    pub mod cmd_defs;
    pub mod status;
}

pub mod bus;

pub mod utils {
    pub mod commissioning;
    pub mod memory_banks;
    pub mod parameters;
}

pub mod drivers {
    #[cfg(any(test, feature = "simulator"))]
    pub mod simulator {
        pub mod bus;
        pub mod gear;
    }
}

pub mod config;
pub mod error;

pub use bus::master::BusMaster;
pub use bus::runtime::{spawn, BusHandle};
pub use config::BusConfig;
pub use error::DaliError;
