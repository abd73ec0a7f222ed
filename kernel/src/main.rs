#![no_std]
#![no_main]

use bootloader_api::{BootInfo, BootloaderConfig, config::Mapping, entry_point};
use kernel::init;

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    init::boot(boot_info)
}
