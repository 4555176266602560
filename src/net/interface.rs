use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::utils::error::NetworkError;

/// Events a network interface publishes to application code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceEvent {
    Connected,
    Disconnected,
    GotIpV4Address,
    LostIpV4Address,
    GotIpV6Address,
    LostIpV6Address,
}

/// Broadcast event source every interface implementation embeds.
///
/// Subscribers that lag simply miss events; interface state can always be
/// re-read through the trait getters.
#[derive(Clone, Debug)]
pub struct InterfaceEvents {
    sender: broadcast::Sender<InterfaceEvent>,
}

impl InterfaceEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event, ignoring the no-subscriber case.
    pub fn emit(&self, event: InterfaceEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for InterfaceEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv4 configuration of an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpV4Settings {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl Default for IpV4Settings {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// IPv6 configuration of an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpV6Settings {
    pub link_local_address: Ipv6Addr,
    pub global_address: Ipv6Addr,
}

impl Default for IpV6Settings {
    fn default() -> Self {
        Self {
            link_local_address: Ipv6Addr::UNSPECIFIED,
            global_address: Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Enable/disable and IP configuration surface of a physical or virtual
/// network interface.
///
/// The TCP client and server consume nothing from this trait; it exists for
/// application wiring (bring an interface up, wait for an address, then
/// enable a server on it).
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    /// The interface's event source.
    fn events(&self) -> &InterfaceEvents;

    /// Brings the interface up.
    async fn enable(&self) -> Result<(), NetworkError>;

    /// Brings the interface down.
    async fn disable(&self) -> Result<(), NetworkError>;

    async fn is_enabled(&self) -> bool;

    /// Whether the link is established (association for Wi-Fi, carrier for
    /// Ethernet).
    async fn is_connected(&self) -> bool;

    async fn enable_ipv4_dhcp_client(&self) -> Result<(), NetworkError>;
    async fn disable_ipv4_dhcp_client(&self) -> Result<(), NetworkError>;
    async fn is_ipv4_dhcp_client_enabled(&self) -> bool;

    async fn enable_ipv6_dhcp_client(&self) -> Result<(), NetworkError>;
    async fn disable_ipv6_dhcp_client(&self) -> Result<(), NetworkError>;
    async fn is_ipv6_dhcp_client_enabled(&self) -> bool;

    async fn ipv4_settings(&self) -> IpV4Settings;

    /// Replaces the static IPv4 configuration.
    async fn set_ipv4_settings(&self, settings: IpV4Settings) -> Result<(), NetworkError>;

    async fn ipv6_settings(&self) -> IpV6Settings;

    /// Sets the global IPv6 address (the link-local address is derived by
    /// the interface itself).
    async fn set_ipv6_global_address(&self, address: Ipv6Addr) -> Result<(), NetworkError>;
}

/// A Wi-Fi interface operating in station mode.
#[async_trait]
pub trait WifiStation: NetworkInterface {
    async fn ssid(&self) -> String;
    async fn set_ssid(&self, ssid: &str) -> Result<(), NetworkError>;
    async fn password(&self) -> String;
    async fn set_password(&self, password: &str) -> Result<(), NetworkError>;
}

/// A wired Ethernet interface.
pub trait Ethernet: NetworkInterface {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Interface double with a static-IP bring-up sequence.
    struct StaticInterface {
        events: InterfaceEvents,
        state: Mutex<StaticState>,
    }

    #[derive(Default)]
    struct StaticState {
        enabled: bool,
        dhcp_v4: bool,
        dhcp_v6: bool,
        ipv4: IpV4Settings,
        ipv6: IpV6Settings,
    }

    impl StaticInterface {
        fn new() -> Self {
            Self { events: InterfaceEvents::new(), state: Mutex::new(StaticState::default()) }
        }
    }

    #[async_trait]
    impl NetworkInterface for StaticInterface {
        fn events(&self) -> &InterfaceEvents {
            &self.events
        }

        async fn enable(&self) -> Result<(), NetworkError> {
            let mut state = self.state.lock().unwrap();
            if !state.enabled {
                state.enabled = true;
                self.events.emit(InterfaceEvent::Connected);
                self.events.emit(InterfaceEvent::GotIpV4Address);
            }
            Ok(())
        }

        async fn disable(&self) -> Result<(), NetworkError> {
            let mut state = self.state.lock().unwrap();
            if state.enabled {
                state.enabled = false;
                self.events.emit(InterfaceEvent::LostIpV4Address);
                self.events.emit(InterfaceEvent::Disconnected);
            }
            Ok(())
        }

        async fn is_enabled(&self) -> bool {
            self.state.lock().unwrap().enabled
        }

        async fn is_connected(&self) -> bool {
            self.state.lock().unwrap().enabled
        }

        async fn enable_ipv4_dhcp_client(&self) -> Result<(), NetworkError> {
            self.state.lock().unwrap().dhcp_v4 = true;
            Ok(())
        }

        async fn disable_ipv4_dhcp_client(&self) -> Result<(), NetworkError> {
            self.state.lock().unwrap().dhcp_v4 = false;
            Ok(())
        }

        async fn is_ipv4_dhcp_client_enabled(&self) -> bool {
            self.state.lock().unwrap().dhcp_v4
        }

        async fn enable_ipv6_dhcp_client(&self) -> Result<(), NetworkError> {
            self.state.lock().unwrap().dhcp_v6 = true;
            Ok(())
        }

        async fn disable_ipv6_dhcp_client(&self) -> Result<(), NetworkError> {
            self.state.lock().unwrap().dhcp_v6 = false;
            Ok(())
        }

        async fn is_ipv6_dhcp_client_enabled(&self) -> bool {
            self.state.lock().unwrap().dhcp_v6
        }

        async fn ipv4_settings(&self) -> IpV4Settings {
            self.state.lock().unwrap().ipv4
        }

        async fn set_ipv4_settings(&self, settings: IpV4Settings) -> Result<(), NetworkError> {
            self.state.lock().unwrap().ipv4 = settings;
            Ok(())
        }

        async fn ipv6_settings(&self) -> IpV6Settings {
            self.state.lock().unwrap().ipv6
        }

        async fn set_ipv6_global_address(&self, address: Ipv6Addr) -> Result<(), NetworkError> {
            self.state.lock().unwrap().ipv6.global_address = address;
            Ok(())
        }
    }

    #[tokio::test]
    async fn bring_up_emits_connected_then_got_address() {
        let interface = StaticInterface::new();
        let mut events = interface.events().subscribe();

        interface
            .set_ipv4_settings(IpV4Settings {
                address: Ipv4Addr::new(192, 168, 1, 20),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::new(192, 168, 1, 1),
            })
            .await
            .unwrap();
        interface.enable().await.unwrap();

        assert!(interface.is_connected().await);
        assert_eq!(events.recv().await.unwrap(), InterfaceEvent::Connected);
        assert_eq!(events.recv().await.unwrap(), InterfaceEvent::GotIpV4Address);

        interface.disable().await.unwrap();
        assert!(!interface.is_enabled().await);
        assert_eq!(events.recv().await.unwrap(), InterfaceEvent::LostIpV4Address);
        assert_eq!(events.recv().await.unwrap(), InterfaceEvent::Disconnected);
    }

    #[tokio::test]
    async fn dhcp_toggles_are_independent_per_family() {
        let interface = StaticInterface::new();
        interface.enable_ipv4_dhcp_client().await.unwrap();
        assert!(interface.is_ipv4_dhcp_client_enabled().await);
        assert!(!interface.is_ipv6_dhcp_client_enabled().await);
        interface.disable_ipv4_dhcp_client().await.unwrap();
        assert!(!interface.is_ipv4_dhcp_client_enabled().await);
    }
}
