//! Routing of parsed server commands into the device mirror
//!
//! The dispatcher is synchronous and owns every device the client knows about.
//! Callers hold it behind a lock and feed it one complete element at a time,
//! in the order the framer produced them.

use crate::command;
use crate::device::{format_message, Device};
use crate::element::ProtocolElement;
use crate::error::{IndiError, IndiResult};
use crate::property::{classify_vector_tag, CommandFamily, PropertyKind, VectorProperty};
use crate::protocol::tags;
use crate::watch::{BlobHandling, BlobModes, WatchList};
use indexmap::IndexMap;

/// Notifications raised while dispatching
///
/// Every method runs inside the dispatch critical section with borrowed state,
/// so implementations must not block. All methods default to no-ops.
pub trait ClientObserver: Send + Sync {
    fn new_device(&self, _device: &Device) {}
    /// Fired while the device is still reachable
    fn remove_device(&self, _device: &Device) {}
    fn new_property(&self, _property: &VectorProperty) {}
    fn update_property(&self, _property: &VectorProperty) {}
    /// Fired before the property is removed
    fn remove_property(&self, _property: &VectorProperty) {}
    fn new_message(&self, _device: &Device, _message: &str) {}
    /// A message that names no known device
    fn universal_message(&self, _message: &str) {}
    fn server_connected(&self) {}
    /// `0` when the client asked for the disconnect, `-1` otherwise
    fn server_disconnected(&self, _exit_code: i32) {}
    fn ping_reply(&self, _uid: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}

/// What happened to a dispatched command
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The command changed client state or reached the observer
    Applied,
    /// Dropped on purpose: echo, watch filter or BLOB policy
    Ignored,
    /// The server expects this reply
    Reply(ProtocolElement),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    devices: IndexMap<String, Device>,
    universal_messages: Vec<String>,
    watch: WatchList,
    blob_modes: BlobModes,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    pub fn property(&self, device: &str, name: &str) -> Option<&VectorProperty> {
        self.devices.get(device)?.property(name)
    }

    pub fn universal_messages(&self) -> &[String] {
        &self.universal_messages
    }

    pub fn watch(&self) -> &WatchList {
        &self.watch
    }

    pub fn watch_mut(&mut self) -> &mut WatchList {
        &mut self.watch
    }

    pub fn blob_modes(&self) -> &BlobModes {
        &self.blob_modes
    }

    pub fn set_blob_mode(&mut self, device: &str, property: Option<&str>, mode: BlobHandling) {
        self.blob_modes.set(device, property, mode);
    }

    /// Drop every device, message, watch entry and BLOB policy
    pub fn clear(&mut self) {
        self.devices.clear();
        self.universal_messages.clear();
        self.watch.clear();
        self.blob_modes.clear();
    }

    /// Drop mirrored state but keep the watch list and BLOB policy
    pub fn reset_devices(&mut self) {
        self.devices.clear();
        self.universal_messages.clear();
    }

    /// Route one top-level command
    ///
    /// A rejected command is logged once and returned as an error; client state
    /// is left as it was before the command.
    pub fn dispatch(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        let result = self.route(command, observer);
        if let Err(e) = &result {
            tracing::warn!("Rejected <{}>: {}", command.tag_name, e);
        }
        result
    }

    fn route(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        let tag = command.tag_name.as_str();

        if tag.starts_with("new") {
            return Ok(DispatchOutcome::Ignored);
        }

        match tag {
            tags::GET_PROPERTIES => {
                return Err(IndiError::PropertyDuplicated {
                    device: command.device().unwrap_or_default().to_string(),
                    property: command.name().unwrap_or_default().to_string(),
                })
            }
            tags::PING_REQUEST => {
                let uid = command.attribute("uid").unwrap_or_default();
                tracing::debug!("pingRequest {}", uid);
                return Ok(DispatchOutcome::Reply(command::ping_reply(uid)));
            }
            tags::PING_REPLY => {
                observer.ping_reply(command.attribute("uid").unwrap_or_default());
                return Ok(DispatchOutcome::Applied);
            }
            tags::MESSAGE => return self.message(command, observer),
            tags::DEL_PROPERTY => return self.delete(command, observer),
            _ => {}
        }

        let Some((family, kind)) = classify_vector_tag(tag) else {
            return Err(IndiError::DispatchError(tag.to_string()));
        };
        let device_name = command
            .device()
            .ok_or_else(|| IndiError::invalid("", command.name().unwrap_or(""), "missing device attribute"))?;

        if kind != PropertyKind::Blob
            && self.blob_modes.resolve(device_name, command.name()) == BlobHandling::Only
        {
            tracing::debug!("BLOB policy Only, dropping <{}> for {}", tag, device_name);
            return Ok(DispatchOutcome::Ignored);
        }

        match family {
            CommandFamily::Def => self.define(command, observer),
            CommandFamily::Set => self.update(command, observer),
            CommandFamily::New => Ok(DispatchOutcome::Ignored),
        }
    }

    fn message(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        if let Some(device) = command.device().and_then(|d| self.devices.get_mut(d)) {
            Self::log_message(device, command, observer);
            return Ok(DispatchOutcome::Applied);
        }

        let message = format_message(command).ok_or_else(|| {
            IndiError::invalid(command.device().unwrap_or(""), "", "message without text")
        })?;
        observer.universal_message(&message);
        self.universal_messages.push(message);
        Ok(DispatchOutcome::Applied)
    }

    fn log_message(device: &mut Device, command: &ProtocolElement, observer: &dyn ClientObserver) {
        if let Some(message) = device.check_message(command).map(str::to_string) {
            observer.new_message(device, &message);
        }
    }

    fn define(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        let device_name = command.device().unwrap_or_default();
        if !self.watch.accepts_device(device_name) {
            tracing::debug!("Device {} is not watched", device_name);
            return Ok(DispatchOutcome::Ignored);
        }

        if !self.devices.contains_key(device_name) {
            let device = Device::new(device_name);
            tracing::info!("New device: {}", device_name);
            observer.new_device(&device);
            if let Some(callback) = self.watch.take_callback(device_name) {
                callback(&device);
            }
            self.devices.insert(device_name.to_string(), device);
        }

        let property_name = command.name().unwrap_or_default();
        if !self.watch.accepts_property(device_name, property_name) {
            tracing::debug!("Property {}.{} is not watched", device_name, property_name);
            return Ok(DispatchOutcome::Ignored);
        }

        let device = self
            .devices
            .get_mut(device_name)
            .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
        Self::log_message(device, command, observer);
        match device.define_property(command)? {
            Some(property) => {
                tracing::debug!("Defined {}.{}", device_name, property.name());
                observer.new_property(property);
                Ok(DispatchOutcome::Applied)
            }
            None => Ok(DispatchOutcome::Ignored),
        }
    }

    fn update(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        let device_name = command.device().unwrap_or_default();
        let property_name = command.name().unwrap_or_default();
        if !self.watch.accepts_property(device_name, property_name) {
            return Ok(DispatchOutcome::Ignored);
        }

        let device = self
            .devices
            .get_mut(device_name)
            .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
        Self::log_message(device, command, observer);
        let property = device.update_property(command)?;
        observer.update_property(property);
        Ok(DispatchOutcome::Applied)
    }

    fn delete(
        &mut self,
        command: &ProtocolElement,
        observer: &dyn ClientObserver,
    ) -> IndiResult<DispatchOutcome> {
        let device_name = command.device().unwrap_or_default();
        let device = self
            .devices
            .get_mut(device_name)
            .ok_or_else(|| IndiError::DeviceNotFound(device_name.to_string()))?;
        Self::log_message(device, command, observer);

        let Some(property_name) = command.name() else {
            self.remove_device(device_name, observer)?;
            return Ok(DispatchOutcome::Applied);
        };

        if let Some(property) = device.property(property_name) {
            observer.remove_property(property);
            device.remove_property(property_name)?;
            tracing::debug!("Deleted {}.{}", device_name, property_name);
            return Ok(DispatchOutcome::Applied);
        }

        if self.blob_modes.resolve(device_name, Some(property_name)) == BlobHandling::Only {
            return Ok(DispatchOutcome::Ignored);
        }
        Err(IndiError::PropertyNotFound {
            device: device_name.to_string(),
            property: property_name.to_string(),
        })
    }

    /// Unlink a device and its watch entry, notifying the observer while the
    /// device is still reachable
    pub fn remove_device(
        &mut self,
        name: &str,
        observer: &dyn ClientObserver,
    ) -> IndiResult<Device> {
        let device = self
            .devices
            .get(name)
            .ok_or_else(|| IndiError::DeviceNotFound(name.to_string()))?;
        observer.remove_device(device);
        let removed = self
            .devices
            .shift_remove(name)
            .ok_or_else(|| IndiError::DeviceNotFound(name.to_string()))?;
        self.watch.unwatch(name);
        tracing::info!("Removed device: {}", name);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::StreamFramer;
    use crate::property::{PropertyState, SwitchState};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records notifications as strings
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ClientObserver for Recorder {
        fn new_device(&self, device: &Device) {
            self.push(format!("new_device {}", device.name()));
        }
        fn remove_device(&self, device: &Device) {
            self.push(format!(
                "remove_device {} ({} properties)",
                device.name(),
                device.properties().len()
            ));
        }
        fn new_property(&self, property: &VectorProperty) {
            self.push(format!("new_property {}.{}", property.device(), property.name()));
        }
        fn update_property(&self, property: &VectorProperty) {
            self.push(format!("update_property {}.{}", property.device(), property.name()));
        }
        fn remove_property(&self, property: &VectorProperty) {
            self.push(format!("remove_property {}.{}", property.device(), property.name()));
        }
        fn new_message(&self, device: &Device, message: &str) {
            self.push(format!("message {} {}", device.name(), message));
        }
        fn universal_message(&self, message: &str) {
            self.push(format!("universal {}", message));
        }
        fn ping_reply(&self, uid: &str) {
            self.push(format!("ping_reply {}", uid));
        }
    }

    fn parse(xml: &str) -> ProtocolElement {
        let mut framer = StreamFramer::new();
        framer.feed(xml.as_bytes()).remove(0).unwrap()
    }

    fn def_number(device: &str, name: &str) -> ProtocolElement {
        parse(&format!(
            "<defNumberVector device='{}' name='{}' state='Idle' perm='rw'>\n\
             <defNumber name='VALUE' min='0' max='100' step='1' format='%g'>\n5\n</defNumber>\n\
             </defNumberVector>\n",
            device, name
        ))
    }

    fn def_text(device: &str, name: &str) -> ProtocolElement {
        parse(&format!(
            "<defTextVector device='{}' name='{}' state='Idle' perm='rw'>\n\
             <defText name='TEXT'>\nhello\n</defText>\n\
             </defTextVector>\n",
            device, name
        ))
    }

    fn def_blob(device: &str, name: &str) -> ProtocolElement {
        parse(&format!(
            "<defBLOBVector device='{}' name='{}' state='Idle' perm='ro'>\n\
             <defBLOB name='IMAGE'/>\n\
             </defBLOBVector>\n",
            device, name
        ))
    }

    fn set_blob(device: &str, name: &str, format: &str, size: usize, body: &str) -> ProtocolElement {
        parse(&format!(
            "<setBLOBVector device='{}' name='{}' state='Ok'>\n\
             <oneBLOB name='IMAGE' size='{}' enclen='{}' format='{}'>\n{}\n</oneBLOB>\n\
             </setBLOBVector>\n",
            device,
            name,
            size,
            body.len(),
            format,
            body
        ))
    }

    #[test]
    fn test_watch_filter_skips_unwatched_device() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.watch_mut().watch_device("D1");

        let outcome = dispatcher.dispatch(&def_number("D2", "P"), &recorder).unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(dispatcher.device("D2").is_none());
        assert!(recorder.events().is_empty());

        let outcome = dispatcher.dispatch(&def_number("D1", "P"), &recorder).unwrap();
        assert_eq!(outcome, DispatchOutcome::Applied);
        assert!(dispatcher.device("D1").is_some());
        assert_eq!(recorder.events(), vec!["new_device D1", "new_property D1.P"]);
    }

    #[test]
    fn test_property_filter_creates_device_but_drops_property() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.watch_mut().watch_property("D1", "WANTED");

        dispatcher.dispatch(&def_number("D1", "OTHER"), &recorder).unwrap();
        dispatcher.dispatch(&def_number("D1", "WANTED"), &recorder).unwrap();
        let device = dispatcher.device("D1").unwrap();
        assert!(!device.has_property("OTHER"));
        assert!(device.has_property("WANTED"));
        assert_eq!(
            recorder.events(),
            vec!["new_device D1", "new_property D1.WANTED"]
        );
    }

    #[test]
    fn test_watch_callback_fires_on_first_creation() {
        let recorder = Recorder::default();
        let created = std::sync::Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = created.clone();
        let mut dispatcher = Dispatcher::new();
        dispatcher.watch_mut().watch_device_with_callback(
            "D1",
            Box::new(move |device: &Device| sink.lock().unwrap().push(device.name().to_string())),
        );

        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();
        dispatcher.dispatch(&def_number("D1", "B"), &recorder).unwrap();
        assert_eq!(*created.lock().unwrap(), vec!["D1".to_string()]);
    }

    #[test]
    fn test_blob_only_policy_drops_non_blob_traffic() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_text("D1", "TEXT_P"), &recorder).unwrap();
        dispatcher.dispatch(&def_blob("D1", "CCD1"), &recorder).unwrap();
        dispatcher.set_blob_mode("D1", None, BlobHandling::Only);

        let set_text = parse(
            "<setTextVector device='D1' name='TEXT_P' state='Ok'>\n\
             <oneText name='TEXT'>\nchanged\n</oneText>\n\
             </setTextVector>\n",
        );
        let outcome = dispatcher.dispatch(&set_text, &recorder).unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored);
        let text = dispatcher.property("D1", "TEXT_P").unwrap();
        assert_eq!(text.text("TEXT").unwrap().text, "hello");

        let outcome = dispatcher
            .dispatch(&set_blob("D1", "CCD1", ".raw", 5, "SGVsbG8="), &recorder)
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Applied);
        let blob = dispatcher.property("D1", "CCD1").unwrap();
        assert_eq!(blob.blob("IMAGE").unwrap().data, b"Hello".to_vec());
        assert!(!recorder
            .events()
            .contains(&"update_property D1.TEXT_P".to_string()));
        assert!(recorder
            .events()
            .contains(&"update_property D1.CCD1".to_string()));
    }

    #[test]
    fn test_corrupt_blob_keeps_previous_bytes() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_blob("D1", "CCD1"), &recorder).unwrap();
        dispatcher
            .dispatch(&set_blob("D1", "CCD1", ".raw", 5, "SGVsbG8="), &recorder)
            .unwrap();

        let result = dispatcher.dispatch(&set_blob("D1", "CCD1", ".raw", 5, "!!not base64!!"), &recorder);
        assert!(matches!(result, Err(IndiError::BlobDecode { .. })));
        let blob = dispatcher.property("D1", "CCD1").unwrap();
        assert_eq!(blob.blob("IMAGE").unwrap().data, b"Hello".to_vec());
        assert_eq!(blob.state(), PropertyState::Ok);
    }

    #[test]
    fn test_delete_device_notifies_before_unlink() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.watch_mut().watch_device("D1");
        dispatcher.watch_mut().watch_device("D2");
        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();
        dispatcher.dispatch(&def_text("D1", "B"), &recorder).unwrap();

        let outcome = dispatcher
            .dispatch(&parse("<delProperty device='D1'/>\n"), &recorder)
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Applied);
        assert!(dispatcher.device("D1").is_none());
        assert_eq!(
            recorder.events().last().unwrap(),
            "remove_device D1 (2 properties)"
        );
        assert_eq!(dispatcher.watch().devices().collect::<Vec<_>>(), vec!["D2"]);
        assert!(!dispatcher.watch().accepts_device("D1"));
        assert!(dispatcher.watch().accepts_device("D2"));
    }

    #[test]
    fn test_delete_property() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();

        let delete = parse("<delProperty device='D1' name='A' message='going away'/>\n");
        dispatcher.dispatch(&delete, &recorder).unwrap();
        assert!(dispatcher.property("D1", "A").is_none());
        let events = recorder.events();
        assert!(events.iter().any(|e| e.ends_with("going away")));
        assert_eq!(events.last().unwrap(), "remove_property D1.A");

        assert!(matches!(
            dispatcher.dispatch(&delete, &recorder),
            Err(IndiError::PropertyNotFound { .. })
        ));
        dispatcher.set_blob_mode("D1", None, BlobHandling::Only);
        assert_eq!(
            dispatcher.dispatch(&delete, &recorder).unwrap(),
            DispatchOutcome::Ignored
        );
    }

    #[test]
    fn test_redefinition_after_delete() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();
        assert!(matches!(
            dispatcher.dispatch(&def_number("D1", "A"), &recorder),
            Err(IndiError::PropertyDuplicated { .. })
        ));
        dispatcher
            .dispatch(&parse("<delProperty device='D1' name='A'/>\n"), &recorder)
            .unwrap();
        assert_eq!(
            dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap(),
            DispatchOutcome::Applied
        );
    }

    #[test]
    fn test_set_for_unknown_device_and_property() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        let set = parse(
            "<setNumberVector device='Ghost' name='A' state='Ok'>\n\
             <oneNumber name='VALUE'>\n1\n</oneNumber>\n\
             </setNumberVector>\n",
        );
        assert!(matches!(
            dispatcher.dispatch(&set, &recorder),
            Err(IndiError::DeviceNotFound(_))
        ));
        assert!(dispatcher.device("Ghost").is_none());

        dispatcher.dispatch(&def_number("Ghost", "B"), &recorder).unwrap();
        assert!(matches!(
            dispatcher.dispatch(&set, &recorder),
            Err(IndiError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn test_set_processes_message_even_when_rejected() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();
        let set = parse(
            "<setNumberVector device='D1' name='A' state='Nonsense' timestamp='2024-01-01T00:00:00' message='Moving'>\n\
             <oneNumber name='VALUE'>\n7\n</oneNumber>\n\
             </setNumberVector>\n",
        );
        assert!(dispatcher.dispatch(&set, &recorder).is_err());
        let device = dispatcher.device("D1").unwrap();
        assert_eq!(device.last_message(), Some("2024-01-01T00:00:00: Moving"));
        assert_eq!(device.property("A").unwrap().number("VALUE").unwrap().value, 5.0);
    }

    #[test]
    fn test_echo_and_protocol_errors() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        let echo = parse(
            "<newSwitchVector device='D1' name='CONNECTION'>\n\
             <oneSwitch name='CONNECT'>\nOn\n</oneSwitch>\n\
             </newSwitchVector>\n",
        );
        assert_eq!(
            dispatcher.dispatch(&echo, &recorder).unwrap(),
            DispatchOutcome::Ignored
        );
        assert!(matches!(
            dispatcher.dispatch(&parse("<getProperties version='1.7'/>\n"), &recorder),
            Err(IndiError::PropertyDuplicated { .. })
        ));
        assert!(matches!(
            dispatcher.dispatch(&parse("<bogusCommand device='D1'/>\n"), &recorder),
            Err(IndiError::DispatchError(_))
        ));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_ping_request_and_reply() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        let outcome = dispatcher
            .dispatch(&parse("<pingRequest uid='abc-1'/>\n"), &recorder)
            .unwrap();
        match outcome {
            DispatchOutcome::Reply(reply) => {
                assert_eq!(reply.tag_name, "pingReply");
                assert_eq!(reply.attribute("uid"), Some("abc-1"));
            }
            other => panic!("expected a reply, got {:?}", other),
        }

        dispatcher
            .dispatch(&parse("<pingReply uid='xyz'/>\n"), &recorder)
            .unwrap();
        assert_eq!(recorder.events(), vec!["ping_reply xyz"]);
    }

    #[test]
    fn test_messages_route_to_device_or_universal() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&def_number("D1", "A"), &recorder).unwrap();

        dispatcher
            .dispatch(
                &parse("<message device='D1' timestamp='2024-01-01T00:00:00' message='hi'/>\n"),
                &recorder,
            )
            .unwrap();
        dispatcher
            .dispatch(
                &parse("<message device='Nobody' timestamp='2024-01-01T00:00:01' message='server wide'/>\n"),
                &recorder,
            )
            .unwrap();
        assert!(dispatcher
            .dispatch(&parse("<message device='Nobody'/>\n"), &recorder)
            .is_err());

        assert_eq!(
            dispatcher.device("D1").unwrap().last_message(),
            Some("2024-01-01T00:00:00: hi")
        );
        assert_eq!(
            dispatcher.universal_messages(),
            &["2024-01-01T00:00:01: server wide".to_string()]
        );
        let events = recorder.events();
        assert!(events.contains(&"message D1 2024-01-01T00:00:00: hi".to_string()));
        assert!(events.contains(&"universal 2024-01-01T00:00:01: server wide".to_string()));
    }

    #[test]
    fn test_updates_preserve_command_order() {
        let recorder = Recorder::default();
        let mut dispatcher = Dispatcher::new();
        let stream = "<defSwitchVector device='Mount' name='TRACK' state='Idle' perm='rw' rule='OneOfMany'>\n\
                      <defSwitch name='ON'>\nOff\n</defSwitch>\n\
                      <defSwitch name='OFF'>\nOn\n</defSwitch>\n\
                      </defSwitchVector>\n\
                      <setSwitchVector device='Mount' name='TRACK' state='Busy'>\n\
                      <oneSwitch name='ON'>\nOn\n</oneSwitch>\n\
                      <oneSwitch name='OFF'>\nOff\n</oneSwitch>\n\
                      </setSwitchVector>\n\
                      <setSwitchVector device='Mount' name='TRACK' state='Ok'>\n\
                      </setSwitchVector>\n";
        let mut framer = StreamFramer::new();
        for element in framer.feed(stream.as_bytes()) {
            dispatcher.dispatch(&element.unwrap(), &recorder).unwrap();
        }
        let track = dispatcher.property("Mount", "TRACK").unwrap();
        assert_eq!(track.state(), PropertyState::Ok);
        assert_eq!(track.switch("ON").unwrap().state, SwitchState::On);
        assert_eq!(
            recorder.events(),
            vec![
                "new_device Mount",
                "new_property Mount.TRACK",
                "update_property Mount.TRACK",
                "update_property Mount.TRACK",
            ]
        );
    }
}
