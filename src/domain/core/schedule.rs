use std::collections::BTreeMap;

use async_trait::async_trait;
use bio::data_structures::interval_tree::IntervalTree;
use chrono::{Datelike, NaiveDate, Weekday};
use derive_more::{Deref, Display, Error, From, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::TimezoneId;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Schedule repository
#[async_trait]
pub trait ScheduleRepository {
    /// Find a schedule by id
    async fn find_by_id(&self, id: ScheduleId) -> Result<Option<Schedule>, DataAccessError>;
    /// Save a schedule
    async fn save(&self, entity: &mut Schedule) -> Result<bool, DataAccessError>;
    /// Delete a schedule
    async fn delete(&self, entity: &mut Schedule) -> Result<bool, DataAccessError>;
}

/// Schedule id
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ScheduleId(u64);

impl Id for ScheduleId {
    type Inner = u64;
}

/// Schedule events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    /// A schedule was created
    ScheduleCreated {
        id: ScheduleId,
        timezone: TimezoneId,
        slot_interval_minutes: u32,
    },
    /// A recurring weekly window was added
    WindowAdded {
        id: ScheduleId,
        weekday: Weekday,
        window: Window,
    },
    /// A recurring weekly window was removed
    WindowRemoved {
        id: ScheduleId,
        weekday: Weekday,
        window: Window,
    },
    /// Hours for one specific date were overridden
    OverrideSet {
        id: ScheduleId,
        date: NaiveDate,
        day: DayOverride,
    },
    /// A date override was cleared, recurring hours apply again
    OverrideCleared { id: ScheduleId, date: NaiveDate },
    /// The slot grid step changed
    IntervalChanged {
        id: ScheduleId,
        slot_interval_minutes: u32,
    },
    /// The schedule was deleted
    ScheduleDeleted { id: ScheduleId },
}

impl Event for ScheduleEvent {
    type Id = ScheduleId;
}

/// Opening hours: recurring weekly windows plus date-specific overrides.
///
/// Window boundaries are wall-clock minutes from midnight in `timezone`.
/// They are deliberately not instants: the same window row maps to different
/// UTC ranges on either side of a DST transition.
#[derive(Debug, Clone, IntoIterator, Serialize, Deserialize)]
pub struct Schedule {
    id: ScheduleId,
    timezone: TimezoneId,
    slot_interval_minutes: u32,
    weekly: [Vec<Window>; 7],
    overrides: BTreeMap<NaiveDate, DayOverride>,
    #[serde(skip)]
    #[into_iterator]
    events: EventQueue<ScheduleEvent>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            id: ScheduleId::default(),
            timezone: TimezoneId::default(),
            slot_interval_minutes: DEFAULT_SLOT_INTERVAL_MINUTES,
            weekly: Default::default(),
            overrides: BTreeMap::new(),
            events: EventQueue::new(),
        }
    }
}

/// Default slot grid step.
pub const DEFAULT_SLOT_INTERVAL_MINUTES: u32 = 15;

impl Schedule {
    pub fn create(
        id: ScheduleId,
        timezone: TimezoneId,
        slot_interval_minutes: u32,
    ) -> Result<Self, ScheduleError> {
        Self::validate_interval(slot_interval_minutes)?;
        let mut entity = Schedule {
            id,
            timezone,
            slot_interval_minutes,
            ..Schedule::default()
        };
        entity.events.push(ScheduleEvent::ScheduleCreated {
            id,
            timezone,
            slot_interval_minutes,
        });
        Ok(entity)
    }

    pub fn add_window(&mut self, weekday: Weekday, window: Window) -> Result<(), ScheduleError> {
        self.validate_window_added(&weekday, &window)?;
        self.weekly[weekday.num_days_from_monday() as usize].push(window);
        self.events.push(ScheduleEvent::WindowAdded {
            id: self.id,
            weekday,
            window,
        });
        Ok(())
    }

    pub fn remove_window(&mut self, weekday: Weekday, window: Window) -> Result<(), ScheduleError> {
        self.validate_window_removed(&weekday, &window)?;
        self.weekly[weekday.num_days_from_monday() as usize].retain(|w| *w != window);
        self.events.push(ScheduleEvent::WindowRemoved {
            id: self.id,
            weekday,
            window,
        });
        Ok(())
    }

    pub fn set_override(&mut self, date: NaiveDate, day: DayOverride) -> Result<(), ScheduleError> {
        Self::validate_override(&day)?;
        self.overrides.insert(date, day.clone());
        self.events.push(ScheduleEvent::OverrideSet {
            id: self.id,
            date,
            day,
        });
        Ok(())
    }

    pub fn clear_override(&mut self, date: NaiveDate) -> Result<(), ScheduleError> {
        if self.overrides.remove(&date).is_none() {
            return Err(ScheduleError::OverrideNotFound);
        }
        self.events
            .push(ScheduleEvent::OverrideCleared { id: self.id, date });
        Ok(())
    }

    pub fn change_interval(&mut self, slot_interval_minutes: u32) -> Result<(), ScheduleError> {
        Self::validate_interval(slot_interval_minutes)?;
        self.slot_interval_minutes = slot_interval_minutes;
        self.events.push(ScheduleEvent::IntervalChanged {
            id: self.id,
            slot_interval_minutes,
        });
        Ok(())
    }

    pub fn timezone(&self) -> TimezoneId {
        self.timezone
    }

    pub fn slot_interval_minutes(&self) -> u32 {
        self.slot_interval_minutes
    }

    /// Working windows effective on `date`: a date override replaces the
    /// recurring weekday rows entirely.
    pub fn windows_for(&self, date: NaiveDate) -> Vec<Window> {
        match self.overrides.get(&date) {
            Some(DayOverride::Closed) => Vec::new(),
            Some(DayOverride::Hours(windows)) => windows.clone(),
            None => self.weekly[date.weekday().num_days_from_monday() as usize].clone(),
        }
    }

    fn validate_id(&self, id: &ScheduleId) -> Result<(), ScheduleError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ScheduleError::MismatchedId),
        }
    }

    fn validate_interval(slot_interval_minutes: u32) -> Result<(), ScheduleError> {
        if slot_interval_minutes == 0 || slot_interval_minutes > MINUTES_PER_DAY {
            return Err(ScheduleError::InvalidInterval);
        }
        Ok(())
    }

    fn validate_window_added(
        &self,
        weekday: &Weekday,
        window: &Window,
    ) -> Result<(), ScheduleError> {
        window.validate()?;
        let rows = &self.weekly[weekday.num_days_from_monday() as usize];
        Self::validate_no_overlap(rows, window)
    }

    fn validate_window_removed(
        &self,
        weekday: &Weekday,
        window: &Window,
    ) -> Result<(), ScheduleError> {
        let rows = &self.weekly[weekday.num_days_from_monday() as usize];
        match rows.contains(window) {
            true => Ok(()),
            false => Err(ScheduleError::WindowNotFound),
        }
    }

    fn validate_override(day: &DayOverride) -> Result<(), ScheduleError> {
        if let DayOverride::Hours(windows) = day {
            let mut seen: Vec<Window> = Vec::new();
            for w in windows {
                w.validate()?;
                Self::validate_no_overlap(&seen, w)?;
                seen.push(*w);
            }
        }
        Ok(())
    }

    fn validate_no_overlap(rows: &[Window], window: &Window) -> Result<(), ScheduleError> {
        match IntervalTree::from_iter(rows.iter().map(|w| (w.start_minute..w.end_minute, w)))
            .find(window.start_minute..window.end_minute)
            .next()
        {
            Some(_) => Err(ScheduleError::OverlappingWindow),
            None => Ok(()),
        }
    }
}

impl Entity for Schedule {
    type Id = ScheduleId;

    const ENTITY_NAME: &'static str = "schedule";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Schedule {
    type Event = ScheduleEvent;
    type Error = ScheduleError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ScheduleEvent::ScheduleCreated {
                slot_interval_minutes,
                ..
            } => Self::validate_interval(*slot_interval_minutes),
            ScheduleEvent::WindowAdded {
                id,
                weekday,
                window,
            } => {
                self.validate_id(id)?;
                self.validate_window_added(weekday, window)
            }
            ScheduleEvent::WindowRemoved {
                id,
                weekday,
                window,
            } => {
                self.validate_id(id)?;
                self.validate_window_removed(weekday, window)
            }
            ScheduleEvent::OverrideSet { id, day, .. } => {
                self.validate_id(id)?;
                Self::validate_override(day)
            }
            ScheduleEvent::OverrideCleared { id, date } => {
                self.validate_id(id)?;
                match self.overrides.contains_key(date) {
                    true => Ok(()),
                    false => Err(ScheduleError::OverrideNotFound),
                }
            }
            ScheduleEvent::IntervalChanged {
                id,
                slot_interval_minutes,
            } => {
                self.validate_id(id)?;
                Self::validate_interval(*slot_interval_minutes)
            }
            ScheduleEvent::ScheduleDeleted { id } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ScheduleEvent::ScheduleCreated {
                id,
                timezone,
                slot_interval_minutes,
            } => {
                if self.id != id {
                    if let Ok(entity) = Self::create(id, timezone, slot_interval_minutes) {
                        *self = entity;
                    }
                }
            }
            ScheduleEvent::WindowAdded {
                id,
                weekday,
                window,
            } => {
                if self.id == id {
                    if let Err(_e) = self.add_window(weekday, window) {}
                }
            }
            ScheduleEvent::WindowRemoved {
                id,
                weekday,
                window,
            } => {
                if self.id == id {
                    if let Err(_e) = self.remove_window(weekday, window) {}
                }
            }
            ScheduleEvent::OverrideSet { id, date, day } => {
                if self.id == id {
                    if let Err(_e) = self.set_override(date, day) {}
                }
            }
            ScheduleEvent::OverrideCleared { id, date } => {
                if self.id == id {
                    if let Err(_e) = self.clear_override(date) {}
                }
            }
            ScheduleEvent::IntervalChanged {
                id,
                slot_interval_minutes,
            } => {
                if self.id == id {
                    if let Err(_e) = self.change_interval(slot_interval_minutes) {}
                }
            }
            ScheduleEvent::ScheduleDeleted { .. } => {}
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.timezone == other.timezone
            && self.slot_interval_minutes == other.slot_interval_minutes
            && self.weekly == other.weekly
            && self.overrides == other.overrides
    }
}

impl Eq for Schedule {}

/// Schedule errors
#[derive(Error, Display, Debug)]
pub enum ScheduleError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Invalid slot interval")]
    InvalidInterval,
    #[display(fmt = "Invalid window bounds")]
    InvalidWindow,
    #[display(fmt = "Window overlaps with an existing window")]
    OverlappingWindow,
    #[display(fmt = "The window does not exist in the schedule")]
    WindowNotFound,
    #[display(fmt = "No override exists for that date")]
    OverrideNotFound,
}

/// Wall-clock working window, minutes from local midnight, half-open.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, Hash)]
pub struct Window {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Window {
    pub fn new(start_minute: u32, end_minute: u32) -> Self {
        Self {
            start_minute,
            end_minute,
        }
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        if self.start_minute >= self.end_minute || self.end_minute > MINUTES_PER_DAY {
            return Err(ScheduleError::InvalidWindow);
        }
        Ok(())
    }
}

/// Date-specific replacement of the recurring hours.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayOverride {
    /// Closed all day
    Closed,
    /// Modified hours for that date only
    Hours(Vec<Window>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule::create(ScheduleId(1), "America/New_York".parse().unwrap(), 30).unwrap()
    }

    #[test]
    fn test_overlapping_window_rejected() {
        let mut s = schedule();
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        assert!(matches!(
            s.add_window(Weekday::Mon, Window::new(600, 660)),
            Err(ScheduleError::OverlappingWindow)
        ));
        // Adjacent windows are fine, the ranges are half-open.
        s.add_window(Weekday::Mon, Window::new(1020, 1140)).unwrap();
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut s = schedule();
        assert!(s.add_window(Weekday::Tue, Window::new(600, 600)).is_err());
        assert!(s.add_window(Weekday::Tue, Window::new(600, 1441)).is_err());
    }

    #[test]
    fn test_override_precedence() {
        let mut s = schedule();
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        assert_eq!(s.windows_for(monday), vec![Window::new(540, 1020)]);

        s.set_override(monday, DayOverride::Closed).unwrap();
        assert!(s.windows_for(monday).is_empty());

        s.set_override(monday, DayOverride::Hours(vec![Window::new(720, 900)]))
            .unwrap();
        assert_eq!(s.windows_for(monday), vec![Window::new(720, 900)]);

        s.clear_override(monday).unwrap();
        assert_eq!(s.windows_for(monday), vec![Window::new(540, 1020)]);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Schedule::create(ScheduleId(2), TimezoneId::default(), 0).is_err());
    }
}
